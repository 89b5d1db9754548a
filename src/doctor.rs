//! Read-only environment diagnosis. Nothing here mutates the system and
//! the command always exits zero; findings land in the report instead.

use std::path::{Path, PathBuf};
use std::process::Command;

use console::style;

use crate::detect;
use crate::logger::RunLog;
use crate::platform::{SearchRoots, BRAND_TOKENS};
use crate::vscode;
use crate::workspace;

/// Binaries expected on PATH after a switch has been activated.
const PATH_BINARIES: [&str; 4] = ["rocq", "coqtop", "coqc", "vsrocqtop"];

pub fn run(roots: &SearchRoots, log: &RunLog) {
    let mut report = Report {
        issues: Vec::new(),
        log,
    };

    report.section("Opam");
    let opam = check_opam(&mut report);

    report.section("Rocq Platform Switches");
    check_switches(&mut report, opam.as_deref());

    report.section("Binaries in PATH");
    check_path_binaries(&mut report);

    report.section("VSCode");
    check_editor(&mut report, roots);

    report.section("Workspace");
    check_workspace(&mut report);

    report.section("Potential Issues");
    if report.issues.is_empty() {
        println!("(no issues detected)");
        log.log("(no issues detected)");
    } else {
        for issue in report.issues.clone() {
            println!("{} {}", style("⚠").yellow(), issue);
        }
    }
}

struct Report<'a> {
    issues: Vec<String>,
    log: &'a RunLog,
}

impl Report<'_> {
    fn section(&self, title: &str) {
        println!("\n=== {} ===", title);
        self.log.log(&format!("=== {} ===", title));
    }

    fn ok(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
        self.log.log(&format!("OK: {}", message));
    }

    fn warn(&mut self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
        self.log.log(&format!("WARN: {}", message));
        self.issues.push(message.to_string());
    }

    fn note(&self, message: &str) {
        println!("  {}", message);
        self.log.log(message);
    }
}

fn check_opam(report: &mut Report) -> Option<PathBuf> {
    let opam = match which::which("opam") {
        Ok(path) => path,
        Err(_) => {
            report.warn("opam not found on PATH");
            return None;
        }
    };
    report.ok(&format!("opam at {}", opam.display()));

    match Command::new(&opam).arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if version.starts_with("2.") {
                report.ok(&format!("opam version {}", version));
            } else {
                report.warn(&format!("opam version {} (2.x required)", version));
            }
        }
        _ => report.warn("opam --version failed"),
    }
    Some(opam)
}

fn check_switches(report: &mut Report, opam: Option<&Path>) {
    let opam = match opam {
        Some(path) => path,
        None => {
            report.note("(skipped; opam is unavailable)");
            return;
        }
    };
    let listing = match Command::new(opam).args(["switch", "list", "--short"]).output() {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        _ => {
            report.warn("opam switch list failed");
            return;
        }
    };
    let switches = detect::matching_switches(&listing, &detect::DEFAULT_SWITCH_PREFIXES);
    if switches.is_empty() {
        report.warn("no platform switches found");
        return;
    }
    for switch in &switches {
        report.ok(&format!("switch {}", switch));
        let switch_arg = format!("--switch={}", switch);

        let packages = Command::new(opam)
            .args(["list", &switch_arg, "--installed", "--short"])
            .output();
        if let Ok(output) = packages {
            if output.status.success() {
                let installed = String::from_utf8_lossy(&output.stdout);
                for line in prover_lines(&installed) {
                    report.note(&line);
                }
            }
        }

        let bin = Command::new(opam).args(["var", &switch_arg, "bin"]).output();
        if let Ok(output) = bin {
            if output.status.success() {
                let bin_dir = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
                let present: Vec<&str> = detect::TOOLCHAIN_BINARIES
                    .iter()
                    .copied()
                    .filter(|name| bin_dir.join(name).is_file())
                    .collect();
                if present.is_empty() {
                    report.warn(&format!("switch {} has no toolchain binaries", switch));
                } else {
                    report.note(&format!("binaries: {}", present.join(", ")));
                }
            }
        }
    }
}

fn check_path_binaries(report: &mut Report) {
    let mut any = false;
    for name in PATH_BINARIES {
        let path = match which::which(name) {
            Ok(path) => path,
            Err(_) => continue,
        };
        any = true;
        match binary_version(&path) {
            Some(version) => report.ok(&format!("{} {} at {}", name, version, path.display())),
            None => report.ok(&format!("{} at {}", name, path.display())),
        }
    }
    if !any {
        report.warn("no prover binaries on PATH (did you source activate.sh?)");
    }
}

fn binary_version(path: &Path) -> Option<String> {
    let output = Command::new(path).arg("--print-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

fn check_editor(report: &mut Report, roots: &SearchRoots) {
    let code = match vscode::find_code(roots) {
        Ok(path) => path,
        Err(_) => {
            report.warn("VSCode CLI not found");
            return;
        }
    };
    report.ok(&format!("code at {}", code.display()));

    let listing = match Command::new(&code)
        .args(["--list-extensions", "--show-versions"])
        .output()
    {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        _ => {
            report.warn("code --list-extensions failed");
            return;
        }
    };
    let extensions = prover_lines(&listing);
    if extensions.is_empty() {
        report.warn("no Rocq extension installed");
        return;
    }
    for line in extensions {
        if is_deprecated_extension(&line) {
            report.warn(&format!("{} (deprecated; vsrocq replaces it)", line));
        } else {
            report.ok(&line);
        }
    }
}

fn check_workspace(report: &mut Report) {
    let dir = match workspace::default_dir() {
        Ok(dir) => dir,
        Err(_) => {
            report.warn("cannot determine the home directory");
            return;
        }
    };
    if !dir.is_dir() {
        report.warn(&format!("workspace {} does not exist", dir.display()));
        return;
    }
    report.ok(&format!("workspace at {}", dir.display()));

    if dir.join(".vscode").join("settings.json").is_file() {
        report.ok("editor settings present");
    } else {
        report.warn("no editor settings in the workspace");
    }
    for script in ["activate.sh", "activate-shell.sh"] {
        if dir.join(script).is_file() {
            report.ok(&format!("{} present", script));
        }
    }
}

/// Lines of a listing that mention the prover under either brand.
fn prover_lines(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            !line.is_empty() && BRAND_TOKENS.iter().any(|token| lower.contains(token))
        })
        .map(str::to_string)
        .collect()
}

fn is_deprecated_extension(line: &str) -> bool {
    line.to_ascii_lowercase().starts_with("coq-community.vscoq")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prover_lines_filter_by_brand() {
        let listing = "rocq-prover.vsrocq@2.2.6\n\
                       ms-python.python@2024.2.1\n\
                       coq-community.vscoq@0.3.9\n\
                       dbaeumer.vscode-eslint@3.0.10\n";
        let lines = prover_lines(listing);
        assert_eq!(
            lines,
            vec!["rocq-prover.vsrocq@2.2.6", "coq-community.vscoq@0.3.9"]
        );
    }

    #[test]
    fn only_the_legacy_extension_is_deprecated() {
        assert!(is_deprecated_extension("coq-community.vscoq@0.3.9"));
        assert!(!is_deprecated_extension("rocq-prover.vsrocq@2.2.6"));
    }

    #[test]
    fn package_listings_keep_prover_packages() {
        let installed = "dune\nocaml\nrocq-prover\nrocq-stdlib\nvsrocq-language-server\nzarith\n";
        let lines = prover_lines(installed);
        assert_eq!(
            lines,
            vec!["rocq-prover", "rocq-stdlib", "vsrocq-language-server"]
        );
    }
}
