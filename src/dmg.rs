use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::logger::RunLog;
use crate::platform::{dir_writable, SearchRoots};

/// Mounts the image, copies its application bundle into a writable
/// application root and detaches again. Returns the installed bundle.
pub fn install_from_image(
    image: &Path,
    force: bool,
    roots: &SearchRoots,
    log: &RunLog,
    on_progress: &mut dyn FnMut(f64),
) -> Result<PathBuf> {
    let mount_point = mount(image, log)?;
    let result = (|| {
        let app = find_app(&mount_point)?;
        on_progress(0.5);
        let dest_dir = choose_install_dir(roots, log)?;
        install_app(&app, &dest_dir, force, log)
    })();
    unmount(&mount_point, log);
    result
}

/// Attaches the image read-only without opening a browser window.
fn mount(image: &Path, log: &RunLog) -> Result<PathBuf> {
    log.log(&format!("Mounting {}", image.display()));
    let output = Command::new("hdiutil")
        .arg("attach")
        .arg(image)
        .args(["-nobrowse", "-readonly"])
        .output()?;
    if !output.status.success() {
        return Err(Error::Install(format!(
            "hdiutil attach failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    mount_point_from_attach(&stdout)
        .map(PathBuf::from)
        .ok_or_else(|| Error::Install("no mount point in hdiutil output".to_string()))
}

/// hdiutil prints a device table; the mount point is the `/Volumes/...`
/// tail of whichever line carries one.
pub(crate) fn mount_point_from_attach(output: &str) -> Option<&str> {
    for line in output.lines() {
        if let Some(idx) = line.find("/Volumes/") {
            return Some(line[idx..].trim());
        }
    }
    None
}

/// Detach, retry with `-force`, then give up with a warning. The mount
/// leaks at worst until reboot, which never fails the install.
fn unmount(mount_point: &Path, log: &RunLog) {
    let detached = Command::new("hdiutil")
        .arg("detach")
        .arg(mount_point)
        .output();
    if matches!(&detached, Ok(output) if output.status.success()) {
        return;
    }
    let forced = Command::new("hdiutil")
        .arg("detach")
        .arg(mount_point)
        .arg("-force")
        .output();
    if !matches!(&forced, Ok(output) if output.status.success()) {
        tracing::warn!("Could not detach {}", mount_point.display());
        log.log(&format!("Detach failed for {}", mount_point.display()));
    }
}

/// Looks for a `.app` bundle at the top level of the mount, then one
/// level deeper.
fn find_app(mount_point: &Path) -> Result<PathBuf> {
    if let Some(app) = app_in_dir(mount_point) {
        return Ok(app);
    }
    let entries = fs::read_dir(mount_point)?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(app) = app_in_dir(&path) {
                return Ok(app);
            }
        }
    }
    Err(Error::Install(format!(
        "no application bundle found in {}",
        mount_point.display()
    )))
}

fn app_in_dir(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut apps: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.extension().is_some_and(|ext| ext == "app"))
        .collect();
    apps.sort();
    apps.into_iter().next()
}

/// First writable application root wins; otherwise a per-user one is
/// created.
fn choose_install_dir(roots: &SearchRoots, log: &RunLog) -> Result<PathBuf> {
    for dir in &roots.app_dirs {
        if dir_writable(dir) {
            return Ok(dir.clone());
        }
        log.log(&format!("{} is not writable", dir.display()));
    }
    let fallback = dirs::home_dir()
        .map(|home| home.join("Applications"))
        .ok_or_else(|| Error::Install("no application directory is writable".to_string()))?;
    fs::create_dir_all(&fallback)?;
    Ok(fallback)
}

/// Copies the bundle into `dest_dir`. An existing bundle is kept untouched
/// unless `force` is set.
pub(crate) fn install_app(
    app: &Path,
    dest_dir: &Path,
    force: bool,
    log: &RunLog,
) -> Result<PathBuf> {
    let name = app
        .file_name()
        .ok_or_else(|| Error::Install(format!("bad bundle path {}", app.display())))?;
    let dest = dest_dir.join(name);

    if dest.exists() {
        if !force {
            log.log(&format!("{} already present, keeping it", dest.display()));
            return Ok(dest);
        }
        if let Err(err) = fs::remove_dir_all(&dest) {
            tracing::warn!("Could not remove {}: {}", dest.display(), err);
        }
    }

    log.log(&format!("Copying {} -> {}", app.display(), dest.display()));
    let rsync = Command::new("rsync")
        .arg("-a")
        .arg("--delete")
        .arg(format!("{}/", app.display()))
        .arg(&dest)
        .output();
    match rsync {
        Ok(output) if output.status.success() => return Ok(dest),
        Ok(output) => log.log(&format!(
            "rsync failed, falling back to cp: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Err(err) => log.log(&format!("rsync unavailable ({}), falling back to cp", err)),
    }

    if dest.exists() {
        let _ = fs::remove_dir_all(&dest);
    }
    let copied = Command::new("cp").arg("-R").arg(app).arg(&dest).output()?;
    if !copied.status.success() {
        return Err(Error::Install(format!(
            "cp -R failed: {}",
            String::from_utf8_lossy(&copied.stderr).trim()
        )));
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_point_parsing() {
        let output = "/dev/disk4          GUID_partition_scheme\n\
                      /dev/disk4s1        Apple_HFS    /Volumes/Rocq-Platform-release  \n";
        assert_eq!(
            mount_point_from_attach(output),
            Some("/Volumes/Rocq-Platform-release")
        );
        assert_eq!(mount_point_from_attach("/dev/disk4 nothing here"), None);
    }

    #[test]
    fn app_discovery_checks_two_levels() {
        let mount = tempfile::tempdir().unwrap();
        fs::create_dir_all(mount.path().join("extras/Rocq-Platform.app")).unwrap();
        let found = find_app(mount.path()).unwrap();
        assert_eq!(found, mount.path().join("extras/Rocq-Platform.app"));

        fs::create_dir(mount.path().join("Top.app")).unwrap();
        let found = find_app(mount.path()).unwrap();
        assert_eq!(found, mount.path().join("Top.app"));
    }

    #[test]
    fn empty_mount_has_no_app() {
        let mount = tempfile::tempdir().unwrap();
        fs::create_dir(mount.path().join("docs")).unwrap();
        let err = find_app(mount.path()).unwrap_err();
        assert!(matches!(err, Error::Install(_)));
    }

    #[test]
    fn existing_bundle_is_kept_without_force() {
        let logs = tempfile::tempdir().unwrap();
        let log = RunLog::create_in(logs.path()).unwrap();

        let src = tempfile::tempdir().unwrap();
        let app = src.path().join("Rocq-Platform.app");
        fs::create_dir(&app).unwrap();
        fs::write(app.join("new-file"), b"new").unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let existing = dest_dir.path().join("Rocq-Platform.app");
        fs::create_dir(&existing).unwrap();
        fs::write(existing.join("old-marker"), b"old").unwrap();

        let dest = install_app(&app, dest_dir.path(), false, &log).unwrap();
        assert_eq!(dest, existing);
        assert!(existing.join("old-marker").exists());
        assert!(!existing.join("new-file").exists());
    }

    #[cfg(unix)]
    #[test]
    fn force_replaces_the_bundle() {
        let logs = tempfile::tempdir().unwrap();
        let log = RunLog::create_in(logs.path()).unwrap();

        let src = tempfile::tempdir().unwrap();
        let app = src.path().join("Rocq-Platform.app");
        fs::create_dir(&app).unwrap();
        fs::write(app.join("new-file"), b"new").unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let existing = dest_dir.path().join("Rocq-Platform.app");
        fs::create_dir(&existing).unwrap();
        fs::write(existing.join("old-marker"), b"old").unwrap();

        let dest = install_app(&app, dest_dir.path(), true, &log).unwrap();
        assert_eq!(dest, existing);
        assert!(dest.join("new-file").exists());
        assert!(!dest.join("old-marker").exists());
    }

    #[test]
    fn writable_root_is_preferred() {
        let logs = tempfile::tempdir().unwrap();
        let log = RunLog::create_in(logs.path()).unwrap();

        let apps = tempfile::tempdir().unwrap();
        let roots = SearchRoots {
            app_dirs: vec![apps.path().to_path_buf()],
            ..Default::default()
        };
        let chosen = choose_install_dir(&roots, &log).unwrap();
        assert_eq!(chosen, apps.path());
    }
}
