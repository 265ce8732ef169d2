//! Bot-challenge and captcha interstitial detection.

use crate::error::ScrapingError;

/// Classifies a document body that is an anti-bot interstitial rather than
/// the requested page. `None` for ordinary content.
#[must_use]
pub fn detect_challenge(body: &str) -> Option<ScrapingError> {
    let lowered = body.to_ascii_lowercase();

    let has_recaptcha =
        lowered.contains("g-recaptcha") || lowered.contains("www.google.com/recaptcha");
    let has_hcaptcha = lowered.contains("h-captcha") || lowered.contains("hcaptcha.com");
    let has_turnstile = lowered.contains("cf-turnstile");
    let has_datadome = lowered.contains("captcha-delivery.com");
    if has_recaptcha || has_hcaptcha || has_turnstile || has_datadome {
        return Some(ScrapingError::captcha("page is a captcha challenge"));
    }

    let has_cloudflare_banner = lowered.contains("attention required! | cloudflare");
    let has_challenge_platform = lowered.contains("/cdn-cgi/challenge-platform/");
    let has_just_a_moment = lowered.contains("just a moment...");
    let has_cookie_gate = lowered.contains("please enable cookies");
    let has_cf_chl = lowered.contains("cf-chl-");
    let has_access_denied = lowered.contains("<title>access denied</title>");

    if has_cloudflare_banner
        || has_challenge_platform
        || (has_just_a_moment && has_cookie_gate)
        || (has_just_a_moment && has_cf_chl)
        || has_access_denied
    {
        return Some(ScrapingError::blocked("page is a bot-protection interstitial"));
    }
    None
}
