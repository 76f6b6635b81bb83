//! Generic naming conventions, consulted after every rule table.

use crate::{ContentType, Importance};

const TEMPORARY_EXT: &[&str] = &["tmp", "temp", "swp", "bak", "lock", "pid"];
const CONFIG_EXT: &[&str] = &["nml", "namelist", "config", "cfg", "conf", "yaml", "yml", "toml", "ini", "xml", "rc"];
const LOG_EXT: &[&str] = &["log", "out", "err", "stdout", "stderr"];
const DATA_EXT: &[&str] = &["nc", "nc4", "grb", "grb2", "grib", "grib2", "h5", "hdf5", "zarr", "srv"];
const METADATA_EXT: &[&str] = &["md", "rst", "json", "txt", "csv"];

pub(crate) fn classify(path: &str) -> Option<(ContentType, Importance, &'static str)> {
    let lower = path.to_ascii_lowercase();
    let name = lower.rsplit('/').next().unwrap_or(&lower);
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    let top = lower.split('/').next().unwrap_or("");
    let in_dir = |dir: &str| lower.starts_with(&format!("{dir}/")) || lower.contains(&format!("/{dir}/"));

    let result = if name.ends_with('~') || TEMPORARY_EXT.contains(&ext) || name.starts_with("core.") {
        (ContentType::Intermediate, Importance::Temporary, "temporary")
    } else if name.contains("restart") || name.starts_with("rst") || name.contains("_rst") || in_dir("restart") {
        (ContentType::Intermediate, Importance::Important, "restart")
    } else if name.starts_with("namelist") || CONFIG_EXT.contains(&ext) {
        (ContentType::Config, Importance::Critical, "namelist")
    } else if LOG_EXT.contains(&ext) || name.contains(".log.") || in_dir("log") || in_dir("logs") {
        (ContentType::Log, Importance::Optional, "log")
    } else if top == "input" || top == "forcing" || in_dir("input") || in_dir("forcing") {
        (ContentType::Input, Importance::Critical, "input")
    } else if name.contains("diag") || name.contains("timing") || in_dir("diagnostics") {
        (ContentType::Diagnostic, Importance::Optional, "diagnostic")
    } else if DATA_EXT.contains(&ext) || in_dir("output") || in_dir("outdata") {
        (ContentType::Output, Importance::Important, "output")
    } else if name.starts_with("readme") || METADATA_EXT.contains(&ext) {
        (ContentType::Metadata, Importance::Optional, "metadata")
    } else {
        return None;
    };
    Some(result)
}
