//! CJK font preamble for model-generated plotting and video code.
//!
//! Matplotlib and moviepy render Chinese text as tofu boxes unless pointed at
//! a host font. The preamble registers a platform font with matplotlib's
//! defaults and exposes a ready-made `_MOVIEPY_FONT_CONFIG` dict so user code
//! never has to know where the host keeps its fonts.

use std::path::Path;

use tracing::{info, warn};

/// Candidate CJK-capable fonts per platform, best first.
fn font_candidates() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &[
            "/System/Library/Fonts/PingFang.ttc",
            "/System/Library/Fonts/STHeiti Medium.ttc",
            "/System/Library/Fonts/Supplemental/Songti.ttc",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            "C:/Windows/Fonts/msyh.ttc",
            "C:/Windows/Fonts/simhei.ttf",
            "C:/Windows/Fonts/simsun.ttc",
        ]
    } else {
        &[
            "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
            "/usr/share/fonts/truetype/droid/DroidSansFallbackFull.ttf",
            "/usr/share/fonts/truetype/arphic/uming.ttc",
        ]
    }
}

/// First CJK font present on this host, if any.
pub fn detect_cjk_font() -> Option<&'static str> {
    font_candidates()
        .iter()
        .find(|f| Path::new(f).exists())
        .copied()
}

/// Prepend the font preamble to user code. Without a host font the code is
/// returned unchanged (the output may contain tofu glyphs).
pub fn inject_font_support(code: &str) -> String {
    let Some(font_path) = detect_cjk_font() else {
        warn!("no CJK font found on this host; rendered text may show tofu glyphs");
        return code.to_string();
    };
    info!(font = font_path, "injecting CJK font preamble");

    let preamble = format!(
        r#"# --- runtime font setup (auto-injected) ---
_ATELIER_FONT_PATH = {font_path:?}
try:
    import matplotlib
    import matplotlib.font_manager as _fm
    _fm.fontManager.addfont(_ATELIER_FONT_PATH)
    _font_name = _fm.FontProperties(fname=_ATELIER_FONT_PATH).get_name()
    matplotlib.rcParams['font.sans-serif'] = [_font_name] + list(matplotlib.rcParams.get('font.sans-serif', []))
    matplotlib.rcParams['axes.unicode_minus'] = False
except Exception:
    pass
_MOVIEPY_FONT_CONFIG = {{'font': _ATELIER_FONT_PATH}}
# --- end font setup ---

"#
    );

    format!("{preamble}{code}")
}
