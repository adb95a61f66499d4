//! Key chords and the output sink they are injected through.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

/// Symbolic keys a binding can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Space,
    Enter,
    Escape,
    Tab,
    CapsLock,
    Delete,
    Insert,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Shift,
    Control,
    Alt,
    Meta,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

impl NamedKey {
    /// Look up a key by the name used in bindings.
    pub fn from_name(name: &str) -> Option<Self> {
        let key = match name {
            "space" => NamedKey::Space,
            "enter" => NamedKey::Enter,
            "esc" | "escape" => NamedKey::Escape,
            "tab" => NamedKey::Tab,
            "caps_lock" => NamedKey::CapsLock,
            "delete" => NamedKey::Delete,
            "insert" => NamedKey::Insert,
            "up" => NamedKey::Up,
            "down" => NamedKey::Down,
            "left" => NamedKey::Left,
            "right" => NamedKey::Right,
            "home" => NamedKey::Home,
            "end" => NamedKey::End,
            "page_up" | "pgup" => NamedKey::PageUp,
            "page_down" | "pgdn" => NamedKey::PageDown,
            "shift" => NamedKey::Shift,
            "ctrl" => NamedKey::Control,
            "alt" => NamedKey::Alt,
            "win" | "cmd" => NamedKey::Meta,
            "f1" => NamedKey::F1,
            "f2" => NamedKey::F2,
            "f3" => NamedKey::F3,
            "f4" => NamedKey::F4,
            "f5" => NamedKey::F5,
            "f6" => NamedKey::F6,
            "f7" => NamedKey::F7,
            "f8" => NamedKey::F8,
            "f9" => NamedKey::F9,
            "f10" => NamedKey::F10,
            "f11" => NamedKey::F11,
            "f12" => NamedKey::F12,
            _ => return None,
        };
        Some(key)
    }

    pub fn name(&self) -> &'static str {
        match self {
            NamedKey::Space => "space",
            NamedKey::Enter => "enter",
            NamedKey::Escape => "esc",
            NamedKey::Tab => "tab",
            NamedKey::CapsLock => "caps_lock",
            NamedKey::Delete => "delete",
            NamedKey::Insert => "insert",
            NamedKey::Up => "up",
            NamedKey::Down => "down",
            NamedKey::Left => "left",
            NamedKey::Right => "right",
            NamedKey::Home => "home",
            NamedKey::End => "end",
            NamedKey::PageUp => "page_up",
            NamedKey::PageDown => "page_down",
            NamedKey::Shift => "shift",
            NamedKey::Control => "ctrl",
            NamedKey::Alt => "alt",
            NamedKey::Meta => "cmd",
            NamedKey::F1 => "f1",
            NamedKey::F2 => "f2",
            NamedKey::F3 => "f3",
            NamedKey::F4 => "f4",
            NamedKey::F5 => "f5",
            NamedKey::F6 => "f6",
            NamedKey::F7 => "f7",
            NamedKey::F8 => "f8",
            NamedKey::F9 => "f9",
            NamedKey::F10 => "f10",
            NamedKey::F11 => "f11",
            NamedKey::F12 => "f12",
        }
    }
}

/// A single key in a chord: either a literal character or a named key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyToken {
    Char(char),
    Named(NamedKey),
}

impl KeyToken {
    /// Parse one chord token. Single characters are literal; longer tokens
    /// must name a known key.
    pub fn parse(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(KeyToken::Char(c)),
            (Some(_), Some(_)) => NamedKey::from_name(token).map(KeyToken::Named),
            (None, _) => None,
        }
    }
}

impl fmt::Display for KeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyToken::Char(c) => write!(f, "{}", c),
            KeyToken::Named(key) => f.write_str(key.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("no valid keys found in '{0}'")]
    NoValidKeys(String),
    #[error("failed to inject {token}: {reason}")]
    Injection { token: KeyToken, reason: String },
}

/// A parsed binding: modifiers held in order around one primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    modifiers: Vec<KeyToken>,
    primary: KeyToken,
}

impl KeyChord {
    /// Parse a "+"-joined binding such as `ctrl+shift+a`.
    ///
    /// Returns `Ok(None)` for an empty binding. Unknown multi-character tokens
    /// are dropped; a binding with nothing left is an error.
    pub fn parse(binding: &str) -> Result<Option<Self>, KeyError> {
        let normalized = binding.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(None);
        }

        let mut tokens = Vec::new();
        for raw in normalized.split('+').map(str::trim) {
            match KeyToken::parse(raw) {
                Some(token) => tokens.push(token),
                None => debug!(token = raw, binding = %normalized, "Discarding unknown key token"),
            }
        }

        let primary = tokens.pop().ok_or(KeyError::NoValidKeys(normalized))?;
        Ok(Some(Self {
            modifiers: tokens,
            primary,
        }))
    }

    pub fn modifiers(&self) -> &[KeyToken] {
        &self.modifiers
    }

    pub fn primary(&self) -> KeyToken {
        self.primary
    }

    /// Press the modifiers in order, tap the primary key, then release the
    /// modifiers in reverse. Modifiers that were pressed are released even
    /// when a later step fails.
    pub fn send(&self, sink: &dyn KeySink) -> Result<(), KeyError> {
        let mut held = Vec::with_capacity(self.modifiers.len());
        let mut result = Ok(());

        for &modifier in &self.modifiers {
            if let Err(e) = sink.press(modifier) {
                result = Err(e);
                break;
            }
            held.push(modifier);
        }

        if result.is_ok() {
            result = sink.press(self.primary).and_then(|()| sink.release(self.primary));
        }

        for &modifier in held.iter().rev() {
            let released = sink.release(modifier);
            if result.is_ok() {
                result = released;
            }
        }
        result
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier)?;
        }
        write!(f, "{}", self.primary)
    }
}

/// Output injection: turns key tokens into OS-level key events.
pub trait KeySink: Send + Sync {
    fn press(&self, key: KeyToken) -> Result<(), KeyError>;
    fn release(&self, key: KeyToken) -> Result<(), KeyError>;
}

/// Sink that only records key events in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingKeySink;

impl KeySink for LoggingKeySink {
    fn press(&self, key: KeyToken) -> Result<(), KeyError> {
        info!(key = %key, "key press");
        Ok(())
    }

    fn release(&self, key: KeyToken) -> Result<(), KeyError> {
        info!(key = %key, "key release");
        Ok(())
    }
}
