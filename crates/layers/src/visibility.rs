/// Resolves the visibility a layer should have right now.
///
/// A local (UI) override wins when set; otherwise the persisted value
/// applies; with neither, the layer is hidden. Callers must re-evaluate this on
/// every pass instead of caching it, since either input can change
/// independently of the layer set.
pub fn effective_visible(local: Option<bool>, persisted: Option<bool>) -> bool {
    local.or(persisted).unwrap_or(false)
}

/// The engine's `layout.visibility` value for a boolean visibility.
pub fn layout_visibility(visible: bool) -> &'static str {
    if visible { "visible" } else { "none" }
}

#[cfg(test)]
mod tests {
    use super::{effective_visible, layout_visibility};

    #[test]
    fn local_override_wins() {
        assert!(effective_visible(Some(true), Some(false)));
        assert!(!effective_visible(Some(false), Some(true)));
    }

    #[test]
    fn persisted_applies_without_override() {
        assert!(effective_visible(None, Some(true)));
        assert!(!effective_visible(None, Some(false)));
    }

    #[test]
    fn hidden_when_nothing_is_known() {
        assert!(!effective_visible(None, None));
    }

    #[test]
    fn layout_values() {
        assert_eq!(layout_visibility(true), "visible");
        assert_eq!(layout_visibility(false), "none");
    }
}
