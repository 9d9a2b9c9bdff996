//! Codec probing and texture format selection
//!
//! A stream's codec comes from the low nibble of its frames' section type.
//! The upload format is chosen by walking an ordered list of rules: the
//! native format, then compressed formats the decoded blocks can be
//! rewritten into, then RGBA8 (CPU converted). RGBA8 ends every walk, so a
//! format is always found.

use hapflow_core::format::BLOCK_DIMENSION;
use hapflow_core::{CodecType, GpuFormat, PlatformConfig};
use std::collections::BTreeSet;
use std::fmt;
use tracing::info;

/// Classify a section type byte by its low nibble
pub fn classify(type_tag: u8) -> CodecType {
    match type_tag & 0x0F {
        0x0B => CodecType::Hap,
        0x0E => CodecType::HapAlpha,
        0x0F => CodecType::HapQ,
        _ => CodecType::Unsupported,
    }
}

/// Native compressed format for a codec
pub fn preferred_format(codec: CodecType) -> Option<GpuFormat> {
    match codec {
        CodecType::Hap => Some(GpuFormat::Bc1),
        CodecType::HapAlpha | CodecType::HapQ => Some(GpuFormat::Bc3),
        CodecType::Unsupported => None,
    }
}

/// Texture formats the GPU can sample, plus the device model for the
/// legacy-GPU heuristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCapabilities {
    supported: BTreeSet<GpuFormat>,
    device_model: Option<String>,
}

impl PlatformCapabilities {
    /// Capabilities with the given formats; RGBA8 is always added
    pub fn new(formats: impl IntoIterator<Item = GpuFormat>) -> Self {
        let mut supported: BTreeSet<GpuFormat> = formats.into_iter().collect();
        supported.insert(GpuFormat::Rgba8);
        Self {
            supported,
            device_model: None,
        }
    }

    /// A desktop GPU with every BCn format
    pub fn desktop() -> Self {
        Self::new(GpuFormat::ALL)
    }

    /// A GPU with no compressed format support
    pub fn rgba_only() -> Self {
        Self::new(std::iter::empty())
    }

    /// Build from the `[platform]` config table
    pub fn from_config(config: &PlatformConfig) -> Self {
        Self::new(config.supported_formats.iter().copied())
            .with_device_model(config.device_model.clone())
    }

    /// Set the device model string
    pub fn with_device_model(mut self, model: Option<String>) -> Self {
        self.device_model = model;
        self
    }

    /// Returns true if the GPU can sample `format`
    pub fn supports(&self, format: GpuFormat) -> bool {
        self.supported.contains(&format)
    }

    /// Supported formats in order
    pub fn formats(&self) -> impl Iterator<Item = GpuFormat> + '_ {
        self.supported.iter().copied()
    }

    /// Device model string, if known
    pub fn device_model(&self) -> Option<&str> {
        self.device_model.as_deref()
    }

    /// Older iPads (generation 11 and below) and iPhones (12 and below)
    /// misrender BCn textures even when they report support
    pub fn is_legacy_device(&self) -> bool {
        let Some(model) = self.device_model.as_deref() else {
            return false;
        };
        device_generation(model, "iPad").is_some_and(|gen| gen <= 11)
            || device_generation(model, "iPhone").is_some_and(|gen| gen <= 12)
    }
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self::desktop()
    }
}

/// Parse the generation from a model string such as `iPad11,3`
fn device_generation(model: &str, family: &str) -> Option<u32> {
    let rest = model.strip_prefix(family)?;
    let digits = rest.split(',').next()?;
    digits.parse().ok()
}

/// Condition a rule places on the platform or stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The GPU reports support for the format
    Supported,
    /// The device is not a legacy iOS device
    ModernDevice,
    /// Width and height are multiples of the 4x4 block size
    BlockAligned,
}

impl Requirement {
    /// Why the requirement fails, or `None` if it holds
    fn check(
        &self,
        format: GpuFormat,
        caps: &PlatformCapabilities,
        width: u32,
        height: u32,
    ) -> Option<String> {
        match self {
            Self::Supported if !caps.supports(format) => {
                Some(format!("{} not supported by the GPU", format))
            }
            Self::ModernDevice if format.is_block_compressed() && caps.is_legacy_device() => {
                Some(format!(
                    "legacy device {}",
                    caps.device_model().unwrap_or_default()
                ))
            }
            Self::BlockAligned
                if format.is_block_compressed()
                    && (width % BLOCK_DIMENSION != 0 || height % BLOCK_DIMENSION != 0) =>
            {
                Some(format!("{}x{} is not a multiple of 4", width, height))
            }
            _ => None,
        }
    }
}

/// Format a rule proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    /// The codec's native compressed format
    Preferred,
    /// A fixed format
    Format(GpuFormat),
}

/// One entry of a [`FormatPolicy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRule {
    /// Proposed format
    pub target: RuleTarget,
    /// All must hold for the rule to match
    pub requires: Vec<Requirement>,
}

impl FormatRule {
    /// A rule proposing the codec's native format
    pub fn preferred(requires: Vec<Requirement>) -> Self {
        Self {
            target: RuleTarget::Preferred,
            requires,
        }
    }

    /// A rule proposing a fixed format
    pub fn format(format: GpuFormat, requires: Vec<Requirement>) -> Self {
        Self {
            target: RuleTarget::Format(format),
            requires,
        }
    }
}

/// CPU work needed to turn decoded frames into the selected format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transcode {
    /// Upload decoded bytes as they are
    Passthrough,
    /// Rewrite BC1 blocks as BC3 blocks with an alpha block prepended
    Bc1ToBc3,
    /// Expand BC1 blocks to RGBA8
    Bc1ToRgba,
    /// Expand BC3 blocks to RGBA8
    Bc3ToRgba,
    /// Expand BC3 blocks and convert scaled YCoCg to RGB
    YCoCgToRgba,
}

/// How a codec can be delivered in `format`, or `None` if it cannot
pub fn transcode_for(codec: CodecType, format: GpuFormat) -> Option<Transcode> {
    if preferred_format(codec) == Some(format) {
        return Some(Transcode::Passthrough);
    }
    match (codec, format) {
        (CodecType::Hap, GpuFormat::Bc3) => Some(Transcode::Bc1ToBc3),
        (CodecType::Hap, GpuFormat::Rgba8) => Some(Transcode::Bc1ToRgba),
        (CodecType::HapAlpha, GpuFormat::Rgba8) => Some(Transcode::Bc3ToRgba),
        (CodecType::HapQ, GpuFormat::Rgba8) => Some(Transcode::YCoCgToRgba),
        (CodecType::Unsupported, GpuFormat::Rgba8) => Some(Transcode::Passthrough),
        _ => None,
    }
}

/// Result of texture format selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSelection {
    /// Format frames are published in
    pub format: GpuFormat,
    /// CPU conversion applied after decode
    pub transcode: Transcode,
    /// Native format, if the codec has one
    pub preferred: Option<GpuFormat>,
    /// Why the preferred format was passed over; `None` when it was selected
    pub fallback_reason: Option<String>,
}

impl FormatSelection {
    /// Returns true if the preferred format could not be used
    pub fn is_degraded(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

impl fmt::Display for FormatSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format)?;
        if let Some(reason) = &self.fallback_reason {
            write!(f, " (fallback: {})", reason)?;
        }
        Ok(())
    }
}

/// Ordered texture format rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPolicy {
    rules: Vec<FormatRule>,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self::new(vec![
            FormatRule::preferred(vec![
                Requirement::Supported,
                Requirement::ModernDevice,
                Requirement::BlockAligned,
            ]),
            FormatRule::format(
                GpuFormat::Bc3,
                vec![
                    Requirement::Supported,
                    Requirement::ModernDevice,
                    Requirement::BlockAligned,
                ],
            ),
            FormatRule::format(GpuFormat::Rgba8, Vec::new()),
        ])
    }
}

impl FormatPolicy {
    /// Create a policy from rules, evaluated in order
    pub fn new(rules: Vec<FormatRule>) -> Self {
        Self { rules }
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[FormatRule] {
        &self.rules
    }

    /// Walk the rules and return the first format that matches and that the
    /// decoder can produce. RGBA8 is returned if nothing matches.
    pub fn select(
        &self,
        codec: CodecType,
        caps: &PlatformCapabilities,
        width: u32,
        height: u32,
    ) -> FormatSelection {
        let preferred = preferred_format(codec);
        let mut reason = match preferred {
            Some(_) => None,
            None => Some(format!("{} has no native texture format", codec)),
        };

        for rule in &self.rules {
            let format = match rule.target {
                RuleTarget::Preferred => match preferred {
                    Some(format) => format,
                    None => continue,
                },
                RuleTarget::Format(format) => format,
            };
            let Some(transcode) = transcode_for(codec, format) else {
                continue;
            };

            let failure = rule
                .requires
                .iter()
                .find_map(|req| req.check(format, caps, width, height));
            match failure {
                None => {
                    if Some(format) != preferred && reason.is_none() {
                        reason = Some(format!("no rule selected {}", codec));
                    }
                    return FormatSelection {
                        format,
                        transcode,
                        preferred,
                        fallback_reason: if Some(format) == preferred {
                            None
                        } else {
                            reason
                        },
                    };
                }
                Some(why) => {
                    if Some(format) == preferred && reason.is_none() {
                        reason = Some(why);
                    }
                }
            }
        }

        FormatSelection {
            format: GpuFormat::Rgba8,
            transcode: transcode_for(codec, GpuFormat::Rgba8).unwrap_or(Transcode::Passthrough),
            preferred,
            fallback_reason: Some(reason.unwrap_or_else(|| "no rule matched".to_string())),
        }
    }
}

/// Select the upload format for a codec with the default policy
pub fn select_texture_format(
    codec: CodecType,
    caps: &PlatformCapabilities,
    width: u32,
    height: u32,
) -> FormatSelection {
    let selection = FormatPolicy::default().select(codec, caps, width, height);
    if let Some(reason) = &selection.fallback_reason {
        info!(
            "Using {} for {} instead of {:?}: {}",
            selection.format, codec, selection.preferred, reason
        );
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_exhaustive() {
        for nibble in 0u8..16 {
            let expected = match nibble {
                0xB => CodecType::Hap,
                0xE => CodecType::HapAlpha,
                0xF => CodecType::HapQ,
                _ => CodecType::Unsupported,
            };
            for high in [0x00, 0xA0, 0xB0, 0xC0] {
                assert_eq!(classify(high | nibble), expected, "{:#x}", high | nibble);
            }
        }
    }

    #[test]
    fn test_native_format_on_desktop() {
        let caps = PlatformCapabilities::desktop();
        let hap = select_texture_format(CodecType::Hap, &caps, 1920, 1080);
        assert_eq!(hap.format, GpuFormat::Bc1);
        assert_eq!(hap.transcode, Transcode::Passthrough);
        assert!(!hap.is_degraded());

        let q = select_texture_format(CodecType::HapQ, &caps, 1920, 1080);
        assert_eq!(q.format, GpuFormat::Bc3);
        assert_eq!(q.transcode, Transcode::Passthrough);
    }

    #[test]
    fn test_fallback_to_rgba_without_bc_support() {
        let caps = PlatformCapabilities::rgba_only();
        let sel = select_texture_format(CodecType::HapQ, &caps, 64, 64);
        assert_eq!(sel.format, GpuFormat::Rgba8);
        assert_eq!(sel.transcode, Transcode::YCoCgToRgba);
        assert_eq!(sel.preferred, Some(GpuFormat::Bc3));
        assert!(sel
            .fallback_reason
            .as_deref()
            .unwrap()
            .contains("not supported"));
    }

    #[test]
    fn test_legacy_device_uses_rgba() {
        let caps = PlatformCapabilities::desktop().with_device_model(Some("iPad11,3".into()));
        assert!(caps.is_legacy_device());
        let sel = select_texture_format(CodecType::Hap, &caps, 64, 64);
        assert_eq!(sel.format, GpuFormat::Rgba8);
        assert_eq!(sel.transcode, Transcode::Bc1ToRgba);
        assert!(sel.fallback_reason.unwrap().contains("iPad11,3"));
    }

    #[test]
    fn test_device_generations() {
        let legacy = |model: &str| {
            PlatformCapabilities::desktop()
                .with_device_model(Some(model.to_string()))
                .is_legacy_device()
        };
        assert!(legacy("iPhone12,1"));
        assert!(!legacy("iPhone13,2"));
        assert!(!legacy("iPad13,4"));
        assert!(!legacy("MacBookPro18,1"));
        assert!(!PlatformCapabilities::desktop().is_legacy_device());
    }

    #[test]
    fn test_unaligned_dimensions_fall_back() {
        let caps = PlatformCapabilities::desktop();
        let sel = select_texture_format(CodecType::HapAlpha, &caps, 30, 30);
        assert_eq!(sel.format, GpuFormat::Rgba8);
        assert_eq!(sel.transcode, Transcode::Bc3ToRgba);
    }

    #[test]
    fn test_unsupported_codec_is_total() {
        let sel = select_texture_format(CodecType::Unsupported, &PlatformCapabilities::desktop(), 8, 8);
        assert_eq!(sel.format, GpuFormat::Rgba8);
        assert!(sel.is_degraded());
    }

    #[test]
    fn test_policy_without_rgba_rule_is_still_total() {
        let policy = FormatPolicy::new(vec![FormatRule::format(
            GpuFormat::Bc7,
            vec![Requirement::Supported],
        )]);
        let sel = policy.select(CodecType::Hap, &PlatformCapabilities::desktop(), 8, 8);
        assert_eq!(sel.format, GpuFormat::Rgba8);
        assert_eq!(sel.transcode, Transcode::Bc1ToRgba);
    }

    #[test]
    fn test_hap_falls_back_to_bc3_before_rgba() {
        let caps = PlatformCapabilities::new([GpuFormat::Bc3]);
        let sel = select_texture_format(CodecType::Hap, &caps, 64, 64);
        assert_eq!(sel.format, GpuFormat::Bc3);
        assert_eq!(sel.transcode, Transcode::Bc1ToBc3);
        assert_eq!(sel.preferred, Some(GpuFormat::Bc1));
        assert!(sel.fallback_reason.unwrap().contains("BC1 not supported"));

        // The intermediate rule shares the device and alignment conditions
        let legacy = caps.clone().with_device_model(Some("iPhone9,1".into()));
        let sel = select_texture_format(CodecType::Hap, &legacy, 64, 64);
        assert_eq!(sel.format, GpuFormat::Rgba8);
        let sel = select_texture_format(CodecType::Hap, &caps, 62, 64);
        assert_eq!(sel.format, GpuFormat::Rgba8);
    }

    #[test]
    fn test_intermediate_rule_order() {
        let policy = FormatPolicy::new(vec![
            FormatRule::preferred(vec![Requirement::Supported]),
            FormatRule::format(GpuFormat::Bc7, vec![Requirement::Supported]),
            FormatRule::format(GpuFormat::Bc3, vec![Requirement::Supported]),
            FormatRule::format(GpuFormat::Rgba8, Vec::new()),
        ]);
        let caps = PlatformCapabilities::new([GpuFormat::Bc3, GpuFormat::Bc7]);

        // BC7 is supported but no transcode produces it, so BC3 is next
        let hap = policy.select(CodecType::Hap, &caps, 16, 16);
        assert_eq!(hap.format, GpuFormat::Bc3);
        assert_eq!(hap.transcode, Transcode::Bc1ToBc3);
        assert!(hap.is_degraded());

        let alpha = policy.select(CodecType::HapAlpha, &caps, 16, 16);
        assert_eq!(alpha.format, GpuFormat::Bc3);
        assert_eq!(alpha.transcode, Transcode::Passthrough);
        assert!(!alpha.is_degraded());

        let q = policy.select(CodecType::HapQ, &PlatformCapabilities::new([GpuFormat::Bc1]), 16, 16);
        assert_eq!(q.format, GpuFormat::Rgba8);
        assert_eq!(q.transcode, Transcode::YCoCgToRgba);
    }

    #[test]
    fn test_from_config() {
        let config = PlatformConfig {
            supported_formats: vec![GpuFormat::Bc1],
            device_model: None,
        };
        let caps = PlatformCapabilities::from_config(&config);
        assert!(caps.supports(GpuFormat::Bc1));
        assert!(caps.supports(GpuFormat::Rgba8));
        assert!(!caps.supports(GpuFormat::Bc3));
    }
}
