//! Verbosity knobs for the two protocol engines (spec §6): `DEBUG_BINKP`
//! and `DEBUG_EMSI`, each read from the environment once and cached. When
//! unset, handshake steps still log at `debug!`/`trace!`; when set, the
//! engines additionally trace raw frame/token bytes that are too noisy to
//! emit unconditionally.

use std::sync::OnceLock;

fn flag(var: &str, cache: &OnceLock<bool>) -> bool {
    *cache.get_or_init(|| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
}

pub fn binkp_verbose() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    flag("DEBUG_BINKP", &FLAG)
}

pub fn emsi_verbose() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    flag("DEBUG_EMSI", &FLAG)
}
