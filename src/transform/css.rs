//! Stylesheet steps backed by lightningcss.

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde::{Deserialize, Serialize};

use super::{AssetFile, TransformError};

/// Minimum browser versions to generate vendor prefixes for.
///
/// Versions are `major` or `major.minor` strings, e.g. `safari = "9"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firefox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ios_saf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opera: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safari: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samsung: Option<String>,
}

impl BrowserTargets {
    /// Roughly "last 8 versions" of older browser support matrices.
    pub fn legacy() -> Self {
        Self {
            chrome: Some("49".to_string()),
            firefox: Some("52".to_string()),
            ie: Some("8".to_string()),
            ios_saf: Some("9".to_string()),
            safari: Some("9".to_string()),
            ..Self::default()
        }
    }

    /// Convert to lightningcss targets. An empty set yields `None`.
    pub fn to_browsers(&self) -> Result<Option<Browsers>, String> {
        let fields = [
            ("android", &self.android),
            ("chrome", &self.chrome),
            ("edge", &self.edge),
            ("firefox", &self.firefox),
            ("ie", &self.ie),
            ("ios_saf", &self.ios_saf),
            ("opera", &self.opera),
            ("safari", &self.safari),
            ("samsung", &self.samsung),
        ];
        if fields.iter().all(|(_, v)| v.is_none()) {
            return Ok(None);
        }

        let mut parsed = [None; 9];
        for (slot, (browser, version)) in parsed.iter_mut().zip(fields.iter()) {
            if let Some(version) = version {
                *slot = Some(
                    parse_version(version)
                        .ok_or_else(|| format!("invalid {} version '{}'", browser, version))?,
                );
            }
        }

        let [android, chrome, edge, firefox, ie, ios_saf, opera, safari, samsung] = parsed;
        Ok(Some(Browsers { android, chrome, edge, firefox, ie, ios_saf, opera, safari, samsung }))
    }
}

/// Encode `major[.minor[.patch]]` the way lightningcss expects: one byte per part.
fn parse_version(version: &str) -> Option<u32> {
    let mut parts = version.trim().split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch: u32 = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    if parts.next().is_some() || major > 255 || minor > 255 || patch > 255 {
        return None;
    }
    Some((major << 16) | (minor << 8) | patch)
}

/// Parse, optimize for `targets`, and print.
fn process(
    file: &AssetFile,
    step: &str,
    browsers: Option<Browsers>,
    minify: bool,
) -> Result<Vec<u8>, TransformError> {
    let code = file.text(step)?;
    let filename = file.source.to_string_lossy().into_owned();
    let fail = |message: String| TransformError::new(step, message).with_file(&file.source);

    let mut sheet = StyleSheet::parse(code, ParserOptions { filename, ..ParserOptions::default() })
        .map_err(|e| fail(e.to_string()))?;

    let targets = Targets { browsers, ..Targets::default() };
    sheet
        .minify(MinifyOptions { targets, ..MinifyOptions::default() })
        .map_err(|e| fail(e.to_string()))?;

    let printed = sheet
        .to_css(PrinterOptions { minify, targets, ..PrinterOptions::default() })
        .map_err(|e| fail(e.to_string()))?;
    Ok(printed.code.into_bytes())
}

pub(super) fn autoprefix(
    mut file: AssetFile,
    targets: &BrowserTargets,
) -> Result<AssetFile, TransformError> {
    let browsers = targets
        .to_browsers()
        .map_err(|e| TransformError::new("autoprefix", e).with_file(&file.source))?;
    file.contents = process(&file, "autoprefix", browsers, false)?;
    Ok(file)
}

pub(super) fn minify(mut file: AssetFile) -> Result<AssetFile, TransformError> {
    file.contents = process(&file, "minify-css", None, true)?;
    Ok(file)
}
