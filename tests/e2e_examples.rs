mod common;

#[cfg(feature = "e2e")]
use common::{CommandOutput, TestContext};

#[test]
#[cfg(feature = "e2e")]
fn e2e_releases_lists_platform_tags() {
    let ctx = TestContext::new();

    // Example: rocqup releases
    let output: CommandOutput = ctx
        .cmd()
        .arg("releases")
        .output()
        .expect("Failed to run rocqup")
        .into();

    output
        .assert_success()
        .assert_stdout_contains("Rocq Platform Releases")
        .assert_stdout_contains("2025.");
}

#[test]
#[cfg(feature = "e2e")]
fn e2e_releases_hide_packaging_tags() {
    let ctx = TestContext::new();

    let output: CommandOutput = ctx
        .cmd()
        .arg("releases")
        .output()
        .expect("Failed to run rocqup")
        .into();

    output.assert_success();
    for line in output.stdout.lines() {
        assert!(
            !line.trim_start().starts_with('v'),
            "packaging tag leaked into the listing: {}",
            line
        );
    }
}
