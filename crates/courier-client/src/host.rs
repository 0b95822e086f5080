//! Host visibility signals.

use tokio::sync::watch;

/// App visibility as reported by the host shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    /// App is foregrounded and its window is shown.
    pub visible: bool,
    /// Window has input focus.
    pub focused: bool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self { visible: true, focused: true }
    }
}

/// Publisher of host visibility changes.
///
/// The host shell calls the setters from its foreground/background and
/// focus/blur notifications. The connection service and every chat view
/// subscribe.
#[derive(Debug)]
pub struct HostSignals {
    tx: watch::Sender<Visibility>,
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSignals {
    /// Start visible and focused.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Visibility::default());
        Self { tx }
    }

    /// Current visibility.
    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    /// Foreground (`true`) or background (`false`). Backgrounding also
    /// drops focus.
    pub fn set_visible(&self, visible: bool) {
        self.tx.send_if_modified(|v| {
            let next = Visibility { visible, focused: v.focused && visible };
            let changed = *v != next;
            *v = next;
            changed
        });
    }

    /// Window focus (`true`) or blur (`false`). Focus implies visible.
    pub fn set_focused(&self, focused: bool) {
        self.tx.send_if_modified(|v| {
            let next = Visibility { visible: v.visible || focused, focused };
            let changed = *v != next;
            *v = next;
            changed
        });
    }

    /// Subscribe to changes.
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

/// Transitions between two visibility values, as `(visible_changed,
/// focus_gained)`.
pub(crate) fn transitions(previous: Visibility, next: Visibility) -> (Option<bool>, bool) {
    let visible = (previous.visible != next.visible).then_some(next.visible);
    let focus_gained = !previous.focused && next.focused;
    (visible, focus_gained)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_drops_focus() {
        let host = HostSignals::new();
        host.set_visible(false);

        assert_eq!(host.current(), Visibility { visible: false, focused: false });
    }

    #[test]
    fn focus_implies_visible() {
        let host = HostSignals::new();
        host.set_visible(false);
        host.set_focused(true);

        assert_eq!(host.current(), Visibility::default());
    }

    #[test]
    fn transitions_report_focus_gain() {
        let hidden = Visibility { visible: false, focused: false };
        assert_eq!(transitions(hidden, Visibility::default()), (Some(true), true));
        assert_eq!(transitions(Visibility::default(), hidden), (Some(false), false));
    }
}
