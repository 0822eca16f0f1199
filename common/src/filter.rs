use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

pub const MIN_BRIGHTNESS: f32 = 0.0;
pub const MAX_BRIGHTNESS: f32 = 3.0;
pub const DEFAULT_BRIGHTNESS: f32 = 1.0;

/// The closed set of filters the engine knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterId {
    #[default]
    None,
    Grayscale,
    Sepia,
    GaussianBlur,
    EdgeDetection,
    OilPainting,
}

impl FilterId {
    pub const ALL: [FilterId; 6] = [
        FilterId::None,
        FilterId::Grayscale,
        FilterId::Sepia,
        FilterId::GaussianBlur,
        FilterId::EdgeDetection,
        FilterId::OilPainting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterId::None => "none",
            FilterId::Grayscale => "grayscale",
            FilterId::Sepia => "sepia",
            FilterId::GaussianBlur => "gaussian_blur",
            FilterId::EdgeDetection => "edge_detection",
            FilterId::OilPainting => "oil_painting",
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterId {
    type Err = FilterParseError;

    /// Accepts the snake_case names, case-insensitively, with `-` allowed for `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        FilterId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| FilterParseError(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown filter '{0}' (expected one of none, grayscale, sepia, gaussian_blur, edge_detection, oil_painting)")]
pub struct FilterParseError(pub String);

/// Filter selection plus parameters, as captured at submission time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub filter: FilterId,
    pub brightness: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filter: FilterId::None,
            brightness: DEFAULT_BRIGHTNESS,
        }
    }
}

impl FilterConfig {
    pub fn new(filter: FilterId, brightness: f32) -> Result<Self, BrightnessError> {
        Ok(Self {
            filter,
            brightness: validate_brightness(brightness)?,
        })
    }
}

/// Reject non-finite values, clamp the rest into the supported range.
pub fn validate_brightness(value: f32) -> Result<f32, BrightnessError> {
    if !value.is_finite() {
        return Err(BrightnessError(value));
    }
    Ok(value.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS))
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("brightness must be a finite number, got {0}")]
pub struct BrightnessError(pub f32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_name() {
        for id in FilterId::ALL {
            assert_eq!(id.as_str().parse::<FilterId>().unwrap(), id);
        }
    }

    #[test]
    fn parse_is_lenient_on_case_and_dashes() {
        assert_eq!("Edge-Detection".parse::<FilterId>().unwrap(), FilterId::EdgeDetection);
        assert_eq!(" SEPIA ".parse::<FilterId>().unwrap(), FilterId::Sepia);
    }

    #[test]
    fn unknown_name_fails_loudly() {
        let err = "vignette".parse::<FilterId>().unwrap_err();
        assert_eq!(err, FilterParseError("vignette".into()));
    }

    #[test]
    fn brightness_is_clamped() {
        assert_eq!(validate_brightness(5.0).unwrap(), MAX_BRIGHTNESS);
        assert_eq!(validate_brightness(-1.0).unwrap(), MIN_BRIGHTNESS);
        assert_eq!(validate_brightness(1.25).unwrap(), 1.25);
    }

    #[test]
    fn brightness_rejects_nan() {
        assert!(validate_brightness(f32::NAN).is_err());
        assert!(FilterConfig::new(FilterId::Sepia, f32::INFINITY).is_err());
    }

    #[test]
    fn default_config() {
        let cfg = FilterConfig::default();
        assert_eq!(cfg.filter, FilterId::None);
        assert_eq!(cfg.brightness, 1.0);
    }
}
