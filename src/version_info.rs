const CI_TAG: &str = env!("HOMEHUB_CI_TAG");
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The CI or git tag stamped at build time, falling back to the
/// package version for builds outside of a checkout
pub fn homehub_version() -> &'static str {
    if CI_TAG.is_empty() {
        PKG_VERSION
    } else {
        CI_TAG
    }
}
