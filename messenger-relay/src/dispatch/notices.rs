//! User-facing notices. Raw errors never reach users; these do.

pub const FAILURE: &str =
    "Sorry, I couldn't complete your request. Please try again later.";

pub const BUSY: &str =
    "Please wait, one of your requests is already in progress.";

pub const DOWNLOAD_STARTED: &str =
    "Downloading the video... This may take a few moments.";

pub const GENERATION_STARTED: &str = "Generating your image... This may take a few moments.";

pub const TIMEOUT: &str = "Sorry, generating the response took too long. Please try again with a shorter or simpler question.";

pub const TEXT_ONLY: &str = "Sorry, I can only handle text messages.";

pub const NO_RESULTS: &str = "No videos found for that search.";

pub const SEARCH_FAILED: &str =
    "Sorry, I couldn't run the video search. Please try again later.";

pub const SEARCH_MODE_ON: &str =
    "Video search mode enabled. Send me keywords to search for.";

pub const SEARCH_MODE_OFF: &str = "Chat mode enabled again. How can I help?";

pub const EMPTY_PROMPT: &str = "Please describe the image after /img, for example: /img a red fox in the snow";

pub const UNKNOWN_ACTION: &str = "Sorry, I couldn't process that request.";

/// Direct delivery failed but the user can still open the source.
pub fn pass_through(url: &str) -> String {
    format!("Sorry, I couldn't send the media directly. You can open it here: {url}")
}

/// Failure notice, with a fallback link when one is known.
pub fn failure_with_link(url: Option<&str>) -> String {
    match url {
        Some(url) => format!("{FAILURE} Here is the original link: {url}"),
        None => FAILURE.to_string(),
    }
}

/// Sent ahead of the media itself.
pub fn delivery_caption(title: &str) -> String {
    format!("Here is your media: {title}")
}
