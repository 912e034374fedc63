// ── UI surface ──
//
// The primary presentation surface (web view, terminal, notification
// center). Core code never assumes one exists; it goes through the broker.

use async_trait::async_trait;
use url::Url;

#[async_trait]
pub trait UiSurface: Send + Sync {
    /// Show a transient informational or error message.
    fn present_alert(&self, title: &str, message: &str);

    /// Load a URL belonging to the connected instance inside the surface.
    fn open_inline(&self, url: &Url);

    /// Hand a foreign URL to the system opener.
    fn open_external(&self, url: &Url);

    /// Ask the user to confirm an action. Surfaces without interaction
    /// answer immediately.
    async fn confirm(&self, title: &str, message: &str) -> bool;
}
