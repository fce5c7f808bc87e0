//! User preferences kept in the session store
//!
//! The theme and the per-page "tips seen" flags live next to the tokens in
//! the same [`KeyValueStore`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chatdesk_core::storage::{tips_seen_key, THEME_KEY};
use chatdesk_core::{KeyValueStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

/// Theme and tips flags over a shared store
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored theme; unknown values fall back to light
    pub fn theme(&self) -> Theme {
        self.store
            .get(THEME_KEY)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), StorageError> {
        self.store.set(THEME_KEY, theme.as_str())
    }

    pub fn toggle_theme(&self) -> Result<Theme, StorageError> {
        let next = self.theme().toggled();
        self.set_theme(next)?;
        Ok(next)
    }

    pub fn tips_seen(&self, page: &str) -> bool {
        self.store.get(&tips_seen_key(page)).as_deref() == Some("true")
    }

    pub fn mark_tips_seen(&self, page: &str) -> Result<(), StorageError> {
        self.store.set(&tips_seen_key(page), "true")
    }

    pub fn reset_tips(&self, page: &str) -> Result<(), StorageError> {
        self.store.remove(&tips_seen_key(page))
    }
}
