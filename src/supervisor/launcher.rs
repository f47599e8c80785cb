//! Host launch and pre-launch payload staging

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use super::SupervisorError;
use crate::config::{PayloadStaging, SupervisorConfig, PORT_ENV, PROJECT_ENV};

/// Start the host process for the configured project without waiting for it.
///
/// The host runs with the project as its working directory. Its stdout is
/// discarded; stderr is inherited so startup errors stay visible.
pub fn launch_host(config: &SupervisorConfig) -> Result<Child, SupervisorError> {
    let project_root = config.project_root();
    let args = config.launch.to_args(&project_root);
    tracing::info!(
        executable = %config.host_executable.display(),
        args = ?args,
        "launching host"
    );

    Command::new(&config.host_executable)
        .args(&args)
        .current_dir(&project_root)
        .env(PROJECT_ENV, &project_root)
        .env(PORT_ENV, config.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| SupervisorError::Launch {
            executable: config.host_executable.clone(),
            source,
        })
}

/// Copy the payload into the project if it is missing there or older than
/// the source. Returns the destination when a copy was made.
pub fn stage_payload(
    staging: &PayloadStaging,
    project_dir: &Path,
) -> Result<Option<PathBuf>, SupervisorError> {
    let staging_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SupervisorError::Staging { path, source }
    };

    let file_name = staging.source.file_name().ok_or_else(|| SupervisorError::Staging {
        path: staging.source.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload has no file name"),
    })?;
    let destination_dir = project_dir.join(&staging.destination_dir);
    let destination = destination_dir.join(file_name);

    let source_modified = fs::metadata(&staging.source)
        .and_then(|meta| meta.modified())
        .map_err(staging_err(&staging.source))?;

    let up_to_date = match fs::metadata(&destination).and_then(|meta| meta.modified()) {
        Ok(destination_modified) => destination_modified >= source_modified,
        Err(_) => false,
    };
    if up_to_date {
        tracing::debug!(destination = %destination.display(), "payload up to date");
        return Ok(None);
    }

    fs::create_dir_all(&destination_dir).map_err(staging_err(&destination_dir))?;
    fs::copy(&staging.source, &destination).map_err(staging_err(&destination))?;
    tracing::info!(
        source = %staging.source.display(),
        destination = %destination.display(),
        "staged payload"
    );
    Ok(Some(destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn staging_in(dir: &Path) -> PayloadStaging {
        let source = dir.join("payload.dll");
        fs::write(&source, b"v1").unwrap();
        PayloadStaging {
            source,
            destination_dir: PathBuf::from("Assets/Plugins"),
        }
    }

    #[test]
    fn test_stage_copies_missing_payload() {
        let source_dir = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let staging = staging_in(source_dir.path());

        let copied = stage_payload(&staging, project.path()).unwrap();
        let expected = project.path().join("Assets/Plugins/payload.dll");
        assert_eq!(copied, Some(expected.clone()));
        assert_eq!(fs::read(expected).unwrap(), b"v1");
    }

    #[test]
    fn test_stage_skips_newer_destination() {
        let source_dir = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let staging = staging_in(source_dir.path());

        let destination = stage_payload(&staging, project.path()).unwrap().unwrap();
        fs::write(&destination, b"local edit").unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&destination)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(stage_payload(&staging, project.path()).unwrap(), None);
        assert_eq!(fs::read(destination).unwrap(), b"local edit");
    }

    #[test]
    fn test_stage_replaces_older_destination() {
        let source_dir = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let staging = staging_in(source_dir.path());

        let destination = stage_payload(&staging, project.path()).unwrap().unwrap();
        let earlier = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&destination)
            .unwrap()
            .set_modified(earlier)
            .unwrap();

        assert!(stage_payload(&staging, project.path()).unwrap().is_some());
    }

    #[test]
    fn test_stage_missing_source_is_staging_error() {
        let project = tempfile::tempdir().unwrap();
        let staging = PayloadStaging {
            source: project.path().join("nope.dll"),
            destination_dir: PathBuf::from("Plugins"),
        };
        let err = stage_payload(&staging, project.path()).unwrap_err();
        assert!(matches!(err, SupervisorError::Staging { .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_launch_missing_executable() {
        let project = tempfile::tempdir().unwrap();
        let mut config = SupervisorConfig::for_project(project.path());
        config.host_executable = PathBuf::from("/definitely/not/a/tickbridge-host");

        let err = launch_host(&config).unwrap_err();
        assert!(matches!(err, SupervisorError::Launch { .. }));
    }
}
