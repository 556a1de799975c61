//! Config manager (spec §4.10): a process-local store of a global
//! `Config` plus sparse per-node `NodeOverride`s, guarded by a read/write
//! lock. `get(addr)` always returns a defensive clone so callers can
//! mutate freely without the mutation leaking back into the store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::address::normalize;

/// How the EMSI handshake behaves before any token has been seen
/// (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialStrategy {
    Wait,
    SendCr,
    SendInq,
}

impl Default for InitialStrategy {
    fn default() -> Self {
        InitialStrategy::Wait
    }
}

/// The effective, fully-resolved configuration for one probe (spec §3
/// "Config").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Master (T2) handshake deadline.
    #[serde(with = "humantime_serde")]
    pub master_timeout: Duration,
    /// Per-step (T1) deadline.
    #[serde(with = "humantime_serde")]
    pub step_timeout: Duration,
    /// T1 used only for the very first step, if smaller than `step_timeout`.
    #[serde(with = "humantime_serde")]
    pub first_step_timeout: Duration,
    /// Per-character read timeout inside the character reader (C5).
    #[serde(with = "humantime_serde")]
    pub char_timeout: Duration,
    /// BinkP per-frame read deadline (spec §4.9).
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    pub initial_strategy: InitialStrategy,
    #[serde(with = "humantime_serde")]
    pub initial_cr_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub initial_cr_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub inq_interval: Duration,

    pub send_inq_twice: bool,
    pub send_req_twice: bool,
    pub send_ack_twice: bool,
    pub send_nak_on_retry: bool,
    pub accept_fd_len_with_cr: bool,
    pub preventive_inq: bool,
    pub emsi_ii: bool,

    /// Transfer protocols we declare support for (e.g. `ZMO`, `ZAP`).
    /// Empty means NCP (spec §3, §4.8).
    pub protocols: Vec<String>,
    /// Per-AKA link-code flags, keyed by normalized address (spec §3
    /// "per-AKA flags matching `^(PU|PM|NF|NX|NR|HA|HN|HX|HF|HR)(\\d+)$`").
    pub per_aka_flags: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            master_timeout: Duration::from_secs(60),
            step_timeout: Duration::from_secs(20),
            first_step_timeout: Duration::from_secs(10),
            char_timeout: Duration::from_secs(10),
            session_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            initial_strategy: InitialStrategy::Wait,
            initial_cr_interval: Duration::from_secs(2),
            initial_cr_timeout: Duration::from_secs(10),
            inq_interval: Duration::from_millis(500),
            send_inq_twice: false,
            send_req_twice: false,
            send_ack_twice: false,
            send_nak_on_retry: false,
            accept_fd_len_with_cr: true,
            preventive_inq: true,
            emsi_ii: true,
            protocols: Vec::new(),
            per_aka_flags: HashMap::new(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Config, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Merge `other` into `self`: non-zero scalars and non-empty
    /// collections in `other` overwrite; `Duration::ZERO`/`0` are treated
    /// as "unset". Booleans are **never** changed by `merge_from` (spec
    /// §4.10) — absent-vs-explicit-false is indistinguishable for a bare
    /// `bool`, so boolean changes only ever come through a `NodeOverride`,
    /// whose fields are `Option<bool>`.
    pub fn merge_from(&mut self, other: &Config) {
        macro_rules! merge_duration {
            ($field:ident) => {
                if other.$field != Duration::ZERO {
                    self.$field = other.$field;
                }
            };
        }
        merge_duration!(master_timeout);
        merge_duration!(step_timeout);
        merge_duration!(first_step_timeout);
        merge_duration!(char_timeout);
        merge_duration!(session_timeout);
        merge_duration!(retry_delay);
        merge_duration!(initial_cr_interval);
        merge_duration!(initial_cr_timeout);
        merge_duration!(inq_interval);

        if other.max_retries != 0 {
            self.max_retries = other.max_retries;
        }
        if !other.protocols.is_empty() {
            self.protocols = other.protocols.clone();
        }
        if !other.per_aka_flags.is_empty() {
            self.per_aka_flags = other.per_aka_flags.clone();
        }
        // `initial_strategy` has no natural zero value distinct from
        // `Wait`, so it follows the same non-boolean overwrite rule as the
        // scalars above: an explicit default-valued `other` simply leaves
        // `self` alone only when `other` carries no strategy at all, which
        // cannot be represented without an `Option` wrapper — callers who
        // need "don't touch initial_strategy" should use `NodeOverride`.
    }
}

/// Sparse per-node overrides (spec §4.10). Every field is optional;
/// applying an absent field leaves the global value untouched. Unlike
/// `Config::merge_from`, boolean fields here *can* force a value (including
/// `false`) because `Option<bool>` can distinguish "unset" from "false".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOverride {
    #[serde(default, with = "humantime_serde::option")]
    pub master_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub step_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub first_step_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub char_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub session_timeout: Option<Duration>,

    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default, with = "humantime_serde::option")]
    pub retry_delay: Option<Duration>,

    #[serde(default)]
    pub initial_strategy: Option<InitialStrategy>,
    #[serde(default, with = "humantime_serde::option")]
    pub initial_cr_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub initial_cr_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub inq_interval: Option<Duration>,

    #[serde(default)]
    pub send_inq_twice: Option<bool>,
    #[serde(default)]
    pub send_req_twice: Option<bool>,
    #[serde(default)]
    pub send_ack_twice: Option<bool>,
    #[serde(default)]
    pub send_nak_on_retry: Option<bool>,
    #[serde(default)]
    pub accept_fd_len_with_cr: Option<bool>,
    #[serde(default)]
    pub preventive_inq: Option<bool>,
    #[serde(default)]
    pub emsi_ii: Option<bool>,

    #[serde(default)]
    pub protocols: Option<Vec<String>>,
    #[serde(default)]
    pub per_aka_flags: Option<HashMap<String, String>>,
}

impl NodeOverride {
    /// Produce an effective `Config` for one node: clone `global`, then
    /// overwrite each field this override actually sets.
    fn apply(&self, global: &Config) -> Config {
        let mut cfg = global.clone();
        macro_rules! apply_field {
            ($field:ident) => {
                if let Some(v) = self.$field.clone() {
                    cfg.$field = v;
                }
            };
        }
        apply_field!(master_timeout);
        apply_field!(step_timeout);
        apply_field!(first_step_timeout);
        apply_field!(char_timeout);
        apply_field!(session_timeout);
        apply_field!(max_retries);
        apply_field!(retry_delay);
        apply_field!(initial_strategy);
        apply_field!(initial_cr_interval);
        apply_field!(initial_cr_timeout);
        apply_field!(inq_interval);
        apply_field!(send_inq_twice);
        apply_field!(send_req_twice);
        apply_field!(send_ack_twice);
        apply_field!(send_nak_on_retry);
        apply_field!(accept_fd_len_with_cr);
        apply_field!(preventive_inq);
        apply_field!(emsi_ii);
        apply_field!(protocols);
        apply_field!(per_aka_flags);
        cfg
    }
}

/// Thread-safe `{ global, per-node overrides }` store (spec §4.10).
pub struct ConfigManager {
    global: RwLock<Config>,
    overrides: RwLock<HashMap<String, NodeOverride>>,
}

impl ConfigManager {
    pub fn new(global: Config) -> ConfigManager {
        ConfigManager {
            global: RwLock::new(global),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Effective config for `addr`: the global config with any matching
    /// override applied. Always a fresh, independently-mutable clone.
    pub fn get(&self, addr: &str) -> Config {
        let key = normalize(addr);
        let global = self.global.read().expect("config lock poisoned").clone();
        let overrides = self.overrides.read().expect("config lock poisoned");
        match overrides.get(&key) {
            Some(ov) => ov.apply(&global),
            None => global,
        }
    }

    pub fn set_global(&self, global: Config) {
        *self.global.write().expect("config lock poisoned") = global;
    }

    /// Install (or replace) one node's override. Deep-copies `over` so the
    /// caller's copy can be mutated afterwards without affecting the store.
    pub fn set_override(&self, addr: &str, over: NodeOverride) {
        let key = normalize(addr);
        self.overrides
            .write()
            .expect("config lock poisoned")
            .insert(key, over);
    }

    /// Replace the entire override table, deep-copying each entry.
    pub fn load_overrides(&self, overrides: HashMap<String, NodeOverride>) {
        let normalized: HashMap<String, NodeOverride> = overrides
            .into_iter()
            .map(|(k, v)| (normalize(&k), v.clone()))
            .collect();
        *self.overrides.write().expect("config lock poisoned") = normalized;
    }
}
