//! Agent image selection.

use tracing::debug;

use crate::env::Env;
use crate::report::warn_user;

/// Registry repository agent images are pulled from.
pub(crate) const IMAGE_REPOSITORY: &str = "ghcr.io/containai/agents";

/// Release channel of the agent image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Stable,
    Nightly,
}

impl Channel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stable" => Some(Self::Stable),
            "nightly" => Some(Self::Nightly),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Stable => "latest",
            Self::Nightly => "nightly",
        }
    }
}

/// Picks the channel: `--channel`, `CONTAINAI_CHANNEL`, `CAI_CHANNEL`, config, then stable.
///
/// Unknown values are skipped with a warning.
pub(crate) fn resolve_channel(
    explicit: Option<&str>,
    env: &dyn Env,
    configured: Option<&str>,
) -> Channel {
    let candidates = [
        ("--channel", explicit.map(str::to_string)),
        ("CONTAINAI_CHANNEL", env.var("CONTAINAI_CHANNEL")),
        ("CAI_CHANNEL", env.var("CAI_CHANNEL")),
        ("image.channel", configured.map(str::to_string)),
    ];

    for (source, value) in candidates {
        let Some(value) = value else { continue };
        match Channel::parse(&value) {
            Some(channel) => {
                debug!("Image channel {channel:?} from {source}");
                return channel;
            }
            None => warn_user(&format!(
                "Ignoring unknown channel '{value}' from {source} (expected stable or nightly)"
            )),
        }
    }
    Channel::Stable
}

/// Full image reference; `--image-tag` replaces the channel's tag.
pub(crate) fn image_reference(tag_override: Option<&str>, channel: Channel) -> String {
    let tag = tag_override.unwrap_or(channel.tag());
    format!("{IMAGE_REPOSITORY}:{tag}")
}
