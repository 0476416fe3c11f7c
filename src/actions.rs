//! Host collaborator actions
//!
//! Side actions an operator triggers next to a capture: jump the registry
//! editor to a key, open folders and links, force an MDM sync and export
//! diagnostics. [`HostActions`] is the seam; [`SystemActions`] runs the
//! Windows tools. Command lines are built by pure functions so they can be
//! checked on any host.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::{CaptureError, Result};

/// Registry key holding the editor's last visited location
pub const REGEDIT_APPLET_KEY: &str =
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Applets\Regedit";

/// Scheduled task that makes the MDM client contact its server
pub const PUSH_LAUNCH_TASK: &str = "PushLaunch";

/// Diagnostics collection passed to `MdmDiagnosticsTool.exe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticsScenario {
    Autopilot,
    DeviceEnrollment,
    DeviceProvisioning,
    Tpm,
    /// Everything the tool collects, written unzipped
    #[default]
    Full,
}

impl DiagnosticsScenario {
    pub const ALL: [DiagnosticsScenario; 5] = [
        DiagnosticsScenario::Autopilot,
        DiagnosticsScenario::DeviceEnrollment,
        DiagnosticsScenario::DeviceProvisioning,
        DiagnosticsScenario::Tpm,
        DiagnosticsScenario::Full,
    ];

    /// Area name as the tool spells it, if this is a single-area scenario.
    pub fn area(self) -> Option<&'static str> {
        match self {
            DiagnosticsScenario::Autopilot => Some("Autopilot"),
            DiagnosticsScenario::DeviceEnrollment => Some("DeviceEnrollment"),
            DiagnosticsScenario::DeviceProvisioning => Some("DeviceProvisioning"),
            DiagnosticsScenario::Tpm => Some("TPM"),
            DiagnosticsScenario::Full => None,
        }
    }

    /// Tool arguments writing into `output_dir`.
    pub fn args(self, output_dir: &Path) -> Vec<String> {
        match self.area() {
            Some(area) => vec![
                "-area".to_string(),
                area.to_string(),
                "-zip".to_string(),
                output_dir.join(format!("{area}.zip")).display().to_string(),
            ],
            None => vec!["-out".to_string(), output_dir.display().to_string()],
        }
    }
}

impl fmt::Display for DiagnosticsScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.area().unwrap_or("Full"))
    }
}

impl FromStr for DiagnosticsScenario {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DiagnosticsScenario::ALL
            .into_iter()
            .find(|scenario| scenario.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown diagnostics scenario '{s}' (expected one of {})",
                    DiagnosticsScenario::ALL.map(|scenario| scenario.to_string()).join(", ")
                )
            })
    }
}

/// A program and its arguments, not yet spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HostCommand {
    fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { program: program.to_string(), args: args.into_iter().map(Into::into).collect() }
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Store `key` as the registry editor's start location.
pub fn set_regedit_last_key_command(key: &str) -> HostCommand {
    HostCommand::new(
        "reg.exe",
        ["add", REGEDIT_APPLET_KEY, "/v", "LastKey", "/t", "REG_SZ", "/d", key, "/f"],
    )
}

/// Close running registry editors so the next launch reads `LastKey`.
pub fn close_regedit_command() -> HostCommand {
    HostCommand::new("taskkill.exe", ["/IM", "regedit.exe", "/F"])
}

pub fn launch_regedit_command() -> HostCommand {
    HostCommand::new("regedit.exe", std::iter::empty::<String>())
}

pub fn open_folder_command(path: &Path) -> HostCommand {
    HostCommand::new("explorer.exe", [path.display().to_string()])
}

/// Hand `url` to the shell's default handler.
pub fn open_url_command(url: &str) -> HostCommand {
    HostCommand::new("explorer.exe", [url])
}

/// Start the MDM client's push-launch task.
pub fn trigger_sync_command() -> HostCommand {
    HostCommand::new(
        "powershell.exe",
        [
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            format!(
                "Get-ScheduledTask | ? {{$_.TaskName -eq '{PUSH_LAUNCH_TASK}'}} \
                 | Start-ScheduledTask"
            ),
        ],
    )
}

pub fn diagnostics_command(scenario: DiagnosticsScenario, output_dir: &Path) -> HostCommand {
    HostCommand::new("MdmDiagnosticsTool.exe", scenario.args(output_dir))
}

/// `%PUBLIC%\Documents\MDMDiagnostics\MdmDiagnosticsTool`
pub fn default_diagnostics_dir() -> PathBuf {
    let public =
        std::env::var_os("PUBLIC").map_or_else(|| PathBuf::from(r"C:\Users\Public"), PathBuf::from);
    public.join("Documents").join("MDMDiagnostics").join("MdmDiagnosticsTool")
}

/// Operator actions available next to a capture.
pub trait HostActions {
    /// Open the registry editor at `key`.
    fn open_registry_at(&self, key: &str) -> Result<()>;

    /// Open `path` in the file manager.
    ///
    /// Returns `NotFound` if the directory does not exist.
    fn open_folder(&self, path: &Path) -> Result<()>;

    fn open_url(&self, url: &str) -> Result<()>;

    /// Ask the MDM client to start a session with its server now.
    fn trigger_external_sync(&self) -> Result<()>;

    /// Run the diagnostics tool into `output_dir`, creating it if needed,
    /// and return the tool's exit code.
    fn run_diagnostics_export(
        &self,
        scenario: DiagnosticsScenario,
        output_dir: &Path,
    ) -> Result<i32>;
}

/// [`HostActions`] backed by the Windows tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemActions;

impl SystemActions {
    pub fn new() -> Self {
        Self
    }

    fn spawn(&self, action: &str, command: &HostCommand) -> Result<()> {
        ensure_windows(action)?;
        debug!(%command, "Spawning");
        command
            .to_command()
            .spawn()
            .map(drop)
            .map_err(|e| CaptureError::action_failed(action, e))
    }

    fn run(&self, action: &str, command: &HostCommand) -> Result<i32> {
        ensure_windows(action)?;
        debug!(%command, "Running");
        let status =
            command.to_command().status().map_err(|e| CaptureError::action_failed(action, e))?;
        Ok(status.code().unwrap_or(-1))
    }
}

fn ensure_windows(action: &str) -> Result<()> {
    if cfg!(windows) {
        Ok(())
    } else {
        Err(CaptureError::unsupported_platform(action, "Windows"))
    }
}

impl HostActions for SystemActions {
    fn open_registry_at(&self, key: &str) -> Result<()> {
        let code = self.run("set regedit location", &set_regedit_last_key_command(key))?;
        if code != 0 {
            warn!(code, key, "Could not store registry editor location");
        }
        // Fails when no editor is running.
        let _ = self.run("close regedit", &close_regedit_command());
        self.spawn("launch regedit", &launch_regedit_command())?;
        info!(key, "Opened registry editor");
        Ok(())
    }

    fn open_folder(&self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(CaptureError::NotFound { path: path.to_path_buf() });
        }
        self.spawn("open folder", &open_folder_command(path))
    }

    fn open_url(&self, url: &str) -> Result<()> {
        self.spawn("open url", &open_url_command(url))
    }

    fn trigger_external_sync(&self) -> Result<()> {
        let code = self.run("trigger MDM sync", &trigger_sync_command())?;
        info!(code, task = PUSH_LAUNCH_TASK, "Triggered MDM sync");
        Ok(())
    }

    fn run_diagnostics_export(
        &self,
        scenario: DiagnosticsScenario,
        output_dir: &Path,
    ) -> Result<i32> {
        ensure_windows("diagnostics export")?;
        std::fs::create_dir_all(output_dir)
            .map_err(|e| CaptureError::action_failed("create diagnostics folder", e))?;

        let code = self.run("diagnostics export", &diagnostics_command(scenario, output_dir))?;
        info!(%scenario, code, output = %output_dir.display(), "Diagnostics export finished");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_scenarios_write_named_zip() {
        let dir = Path::new("out");
        let args = DiagnosticsScenario::Tpm.args(dir);
        assert_eq!(args[..3], ["-area", "TPM", "-zip"]);
        assert_eq!(Path::new(&args[3]), dir.join("TPM.zip"));
        assert_eq!(
            diagnostics_command(DiagnosticsScenario::Autopilot, dir).args[..2],
            ["-area".to_string(), "Autopilot".to_string()]
        );
    }

    #[test]
    fn full_scenario_writes_folder() {
        let dir = Path::new("out");
        assert_eq!(DiagnosticsScenario::Full.args(dir), vec!["-out", "out"]);
        assert_eq!(DiagnosticsScenario::default(), DiagnosticsScenario::Full);
    }

    #[test]
    fn scenario_parsing_is_case_insensitive() {
        assert_eq!("tpm".parse::<DiagnosticsScenario>(), Ok(DiagnosticsScenario::Tpm));
        assert_eq!(
            "DeviceEnrollment".parse::<DiagnosticsScenario>(),
            Ok(DiagnosticsScenario::DeviceEnrollment)
        );
        assert_eq!("full".parse::<DiagnosticsScenario>(), Ok(DiagnosticsScenario::Full));
        assert!("Intune".parse::<DiagnosticsScenario>().unwrap_err().contains("Autopilot"));

        for scenario in DiagnosticsScenario::ALL {
            assert_eq!(scenario.to_string().parse::<DiagnosticsScenario>(), Ok(scenario));
        }
    }

    #[test]
    fn regedit_location_command() {
        let key = r"Computer\HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Enrollments";
        let command = set_regedit_last_key_command(key);
        assert_eq!(command.program, "reg.exe");
        assert_eq!(command.args[1], REGEDIT_APPLET_KEY);
        assert_eq!(command.args[7], key);
    }

    #[test]
    fn sync_command_starts_push_launch() {
        let command = trigger_sync_command();
        assert_eq!(command.program, "powershell.exe");
        let script = command.args.last().unwrap();
        assert!(script.contains("$_.TaskName -eq 'PushLaunch'"));
        assert!(script.ends_with("Start-ScheduledTask"));
    }

    #[test]
    fn default_dir_ends_with_tool_folder() {
        let dir = default_diagnostics_dir();
        let expected = Path::new("Documents").join("MDMDiagnostics").join("MdmDiagnosticsTool");
        assert!(dir.ends_with(expected));
    }

    #[test]
    fn missing_folder_is_not_found() {
        let missing = Path::new("definitely-not-a-folder-7f3a");
        let err = SystemActions::new().open_folder(missing).unwrap_err();
        assert!(matches!(err, CaptureError::NotFound { path } if path == missing));
    }

    #[cfg(not(windows))]
    #[test]
    fn actions_need_windows() {
        assert!(matches!(
            SystemActions::new().trigger_external_sync(),
            Err(CaptureError::UnsupportedPlatform { .. })
        ));
    }
}
