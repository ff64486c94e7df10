//! Host checks for a CSI camera that will not open.
//!
//! Argus failures surface as a bare pipeline error, so when the CSI source
//! fails to open it logs what the host looks like: the Argus socket, the
//! video device nodes, the process identity and the GStreamer search paths.
//! `CHECK_NVARGUS=1` adds `systemctl status nvargus-daemon`.

use std::fs;
use std::path::Path;
use std::process::Command;

use crate::config::is_truthy;

use super::csi::CsiSettings;

pub const ARGUS_SOCKET: &str = "/tmp/argus_socket";
const COMMAND_OUTPUT_LIMIT: usize = 800;

/// One line describing `path`: owner and mode when it exists, `MISSING`
/// otherwise.
pub fn describe_path(label: &str, path: &Path) -> String {
    match fs::metadata(path) {
        Ok(meta) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::MetadataExt;
                format!(
                    "{}: exists owner={}:{} mode={:o}",
                    label,
                    meta.uid(),
                    meta.gid(),
                    meta.mode() & 0o777
                )
            }
            #[cfg(not(unix))]
            {
                format!("{}: exists readonly={}", label, meta.permissions().readonly())
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => format!("{}: MISSING", label),
        Err(err) => format!("{}: exists but stat failed ({})", label, err),
    }
}

/// Names of `video*` entries in `dev_dir`, sorted.
pub fn video_nodes(dev_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dev_dir) else {
        return Vec::new();
    };
    let mut nodes: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("video"))
        .collect();
    nodes.sort();
    nodes
}

/// `Uid`, `Gid` and `Groups` of the current process, from procfs.
fn process_identity() -> String {
    let Ok(status) = fs::read_to_string("/proc/self/status") else {
        return "<unavailable>".to_string();
    };
    let field = |name: &str| {
        status
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.split_whitespace().next().map(str::to_string))
            .unwrap_or_else(|| "?".to_string())
    };
    let groups = status
        .lines()
        .find_map(|line| line.strip_prefix("Groups:"))
        .map(|rest| rest.split_whitespace().collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    format!("{}/{} groups={}", field("Uid:"), field("Gid:"), groups)
}

fn env_or_unset(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| "<unset>".to_string())
}

/// Everything worth knowing about the host when an Argus pipeline fails.
pub fn environment_report(settings: &CsiSettings) -> Vec<String> {
    let nodes = video_nodes(Path::new("/dev"));
    let mode = settings
        .sensor_mode
        .map(|mode| mode.to_string())
        .unwrap_or_else(|| "<unset>".to_string());
    let mut lines = vec![
        format!("pipeline: {}", settings.pipeline_description()),
        describe_path(
            &format!("Argus socket {}", ARGUS_SOCKET),
            Path::new(ARGUS_SOCKET),
        ),
        describe_path(
            &format!("CSI device /dev/video{}", settings.sensor_id),
            Path::new(&format!("/dev/video{}", settings.sensor_id)),
        ),
        format!(
            "video nodes visible: {}",
            if nodes.is_empty() {
                "<none>".to_string()
            } else {
                nodes.join(", ")
            }
        ),
        format!(
            "width/height/fps/sensor-id/sensor-mode={}/{}/{}/{}/{}",
            settings.width, settings.height, settings.fps, settings.sensor_id, mode
        ),
        format!("uid/gid={}", process_identity()),
        format!("LD_LIBRARY_PATH={}", env_or_unset("LD_LIBRARY_PATH")),
        format!("GST_PLUGIN_PATH={}", env_or_unset("GST_PLUGIN_PATH")),
    ];
    if std::env::var("CHECK_NVARGUS").is_ok_and(|value| is_truthy(&value)) {
        lines.push(nvargus_daemon_status());
    }
    lines
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(COMMAND_OUTPUT_LIMIT) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// `systemctl status nvargus-daemon`. Containers usually lack systemctl;
/// that is reported, not treated as an error.
fn nvargus_daemon_status() -> String {
    match Command::new("systemctl")
        .args(["status", "nvargus-daemon"])
        .output()
    {
        Ok(output) => format!(
            "systemctl status nvargus-daemon: exit={} stdout: {} stderr: {}",
            output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            truncate(String::from_utf8_lossy(&output.stdout).trim()),
            truncate(String::from_utf8_lossy(&output.stderr).trim())
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            "systemctl not found; skipping nvargus-daemon status".to_string()
        }
        Err(err) => format!("systemctl invocation failed: {}", err),
    }
}

/// Log `environment_report` at debug, one line per entry.
pub fn log_environment(settings: &CsiSettings) {
    for line in environment_report(settings) {
        log::debug!("CsiSource diagnostics: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CsiSettings {
        CsiSettings {
            sensor_id: 3,
            sensor_mode: None,
            width: 640,
            height: 480,
            fps: 15,
            flip: 0,
        }
    }

    #[test]
    fn describes_present_and_missing_paths() {
        let dir = tempfile::tempdir().expect("temp dir");
        let present = dir.path().join("argus_socket");
        fs::write(&present, b"").expect("write");

        let line = describe_path("socket", &present);
        assert!(line.starts_with("socket: exists"), "{}", line);
        assert_eq!(
            describe_path("socket", &dir.path().join("absent")),
            "socket: MISSING"
        );
    }

    #[test]
    fn lists_only_video_nodes_in_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        for name in ["video2", "null", "video0", "media0"] {
            fs::write(dir.path().join(name), b"").expect("write");
        }

        assert_eq!(video_nodes(dir.path()), vec!["video0", "video2"]);
        assert!(video_nodes(&dir.path().join("absent")).is_empty());
    }

    #[test]
    fn report_covers_pipeline_device_and_search_paths() {
        let lines = environment_report(&settings());

        assert!(lines[0].starts_with("pipeline: nvarguscamerasrc sensor-id=3 !"));
        assert!(lines.iter().any(|l| l.starts_with("Argus socket /tmp/argus_socket: ")));
        assert!(lines.iter().any(|l| l.starts_with("CSI device /dev/video3: ")));
        assert!(lines.iter().any(|l| l.starts_with("video nodes visible: ")));
        assert!(lines
            .iter()
            .any(|l| l == "width/height/fps/sensor-id/sensor-mode=640/480/15/3/<unset>"));
        assert!(lines.iter().any(|l| l.starts_with("uid/gid=")));
        assert!(lines.iter().any(|l| l.starts_with("LD_LIBRARY_PATH=")));
        assert!(lines.iter().any(|l| l.starts_with("GST_PLUGIN_PATH=")));
    }

    #[test]
    fn long_command_output_is_truncated() {
        let long = "x".repeat(COMMAND_OUTPUT_LIMIT + 50);
        assert_eq!(truncate(&long).len(), COMMAND_OUTPUT_LIMIT);
        assert_eq!(truncate("short"), "short");
    }
}
