//! Handoff to the external wallet app.

use url::Url;

use crate::error::HandoffError;

/// Opens a URL in another application.
///
/// The host application supplies this capability; on a phone it wraps the
/// platform's "open URL" call. It must return quickly: the launch is
/// fire-and-forget and the outcome is observed by polling.
pub trait HandoffLauncher: Send + Sync {
    /// Launches the app registered for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NoHandler`] if nothing can open the URL.
    fn launch(&self, url: &Url) -> Result<(), HandoffError>;
}

impl<F> HandoffLauncher for F
where
    F: Fn(&Url) -> Result<(), HandoffError> + Send + Sync,
{
    fn launch(&self, url: &Url) -> Result<(), HandoffError> {
        self(url)
    }
}

/// Parses the authorization URL of the current request and launches it.
pub(crate) fn launch(launcher: &dyn HandoffLauncher, url: Option<&str>) -> Result<(), HandoffError> {
    let raw = url.ok_or(HandoffError::MissingUrl)?;
    let parsed = Url::parse(raw).map_err(|e| HandoffError::InvalidUrl(format!("{raw}: {e}")))?;
    launcher.launch(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_all(_: &Url) -> Result<(), HandoffError> {
        Ok(())
    }

    #[test]
    fn missing_url_is_reported() {
        assert_eq!(launch(&accept_all, None), Err(HandoffError::MissingUrl));
    }

    #[test]
    fn unparseable_url_is_reported() {
        let err = launch(&accept_all, Some("not a url")).unwrap_err();
        assert!(matches!(err, HandoffError::InvalidUrl(_)));
    }

    #[test]
    fn launcher_error_is_forwarded() {
        let refuse =
            |url: &Url| -> Result<(), HandoffError> { Err(HandoffError::NoHandler(url.to_string())) };
        let err = launch(&refuse, Some("https://wallet.example/pay/1")).unwrap_err();
        assert_eq!(
            err,
            HandoffError::NoHandler("https://wallet.example/pay/1".to_owned())
        );
    }
}
