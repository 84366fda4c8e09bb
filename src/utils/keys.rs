//! Key-name resolution: user-facing key names (as stored in macro files)
//! mapped to `enigo::Key`.

use enigo::Key;

/// Resolve a key name to an `enigo::Key`.
///
/// Accepts the common special-key names (case-insensitive) plus any single
/// character, which maps to `Key::Unicode`. Returns `None` for names the
/// engine cannot inject.
pub fn resolve_key(name: &str) -> Option<Key> {
    let trimmed = name.trim();
    let lower = trimmed.to_ascii_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Return,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "tab" => Key::Tab,
        "escape" | "esc" => Key::Escape,
        "shift" => Key::Shift,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "win" | "cmd" | "meta" => Key::Meta,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "page_up" | "pageup" => Key::PageUp,
        "page_down" | "pagedown" => Key::PageDown,
        "caps_lock" => Key::CapsLock,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => {
            let mut chars = trimmed.chars();
            let c = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            Key::Unicode(c)
        }
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_names_resolve() {
        assert_eq!(resolve_key("enter"), Some(Key::Return));
        assert_eq!(resolve_key("ESC"), Some(Key::Escape));
        assert_eq!(resolve_key(" f8 "), Some(Key::F8));
        assert_eq!(resolve_key("page_down"), Some(Key::PageDown));
    }

    #[test]
    fn single_chars_resolve_preserving_case() {
        assert_eq!(resolve_key("a"), Some(Key::Unicode('a')));
        assert_eq!(resolve_key("A"), Some(Key::Unicode('A')));
        assert_eq!(resolve_key("é"), Some(Key::Unicode('é')));
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert_eq!(resolve_key("not_a_key"), None);
        assert_eq!(resolve_key(""), None);
    }
}
