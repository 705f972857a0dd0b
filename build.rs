/// Stamps HOMEHUB_CI_TAG for version_info: taken from the environment
/// in CI, from a `.tag` file in release tarballs, else from git.
fn ci_tag() -> String {
    if let Ok(env) = std::env::var("HOMEHUB_CI_TAG") {
        return env.trim().to_string();
    }
    if let Ok(tag) = std::fs::read_to_string(".tag") {
        return tag.trim().to_string();
    }
    std::process::Command::new("git")
        .args([
            "-c",
            "core.abbrev=8",
            "show",
            "-s",
            "--format=%cd-%h",
            "--date=format:%Y.%m.%d",
        ])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_default()
}

fn main() {
    let ci_tag = ci_tag();
    println!("cargo:rerun-if-changed=.tag");
    println!("cargo:rerun-if-env-changed=HOMEHUB_CI_TAG");
    println!("cargo:rustc-env=HOMEHUB_CI_TAG={ci_tag}");
}
