//! Source rewrites applied to model-generated Python before execution.
//!
//! Model code routinely tries to build its own directory layout
//! (`os.makedirs('outputs/...')`, `plt.savefig('outputs/x/chart.png')`) or
//! write to absolute paths. The working directory is already the
//! conversation workspace, so every such path is reduced to a bare filename
//! and directory-creation calls are removed outright.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::info;

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("regex must compile"))
        }
    };
}

static_regex!(makedirs_re, r"os\.makedirs\s*\([^)]+\)\s*\n?");
static_regex!(pathlib_mkdir_re, r"Path\s*\([^)]*\)\.mkdir\s*\([^)]*\)\s*\n?");
static_regex!(savefig_re, r#"savefig\s*\(\s*['"]([^'"]+)['"]\s*\)"#);
static_regex!(
    to_method_re,
    r#"\.(to_excel|to_csv|to_json|to_html)\s*\(\s*['"]([^'"]+)['"]\s*"#
);
static_regex!(image_save_re, r#"\.save\s*\(\s*['"]([^'"]+)['"]\s*"#);
static_regex!(
    open_write_re,
    r#"open\s*\(\s*['"]([^'"]+)['"]\s*,\s*['"]([^'"]+)['"]\s*"#
);
static_regex!(moviepy_from_re, r"\bfrom\s+moviepy\.edit\b");
static_regex!(moviepy_import_as_re, r"\bimport\s+moviepy\.edit\s+as\s+(\w+)");
static_regex!(moviepy_import_re, r"\bimport\s+moviepy\.edit\b");
static_regex!(python_fence_re, r"(?s)```python\s*\n(.*?)\n```");
static_regex!(any_fence_re, r"(?s)```\s*\n(.*?)\n```");

/// Strip any directory components, returning the bare filename.
fn bare_filename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn quote_of(full: &str) -> char {
    if full.contains('\'') {
        '\''
    } else {
        '"'
    }
}

/// Rewrite path-carrying calls so every artifact lands in the workspace.
pub fn sanitize_paths(code: &str) -> String {
    let original = code;

    let code = makedirs_re().replace_all(code, "# [auto-removed] makedirs not needed, cwd is already set\n");
    let code = pathlib_mkdir_re().replace_all(&code, "# [auto-removed] mkdir not needed\n");

    let code = savefig_re().replace_all(&code, |caps: &Captures| {
        let q = quote_of(&caps[0]);
        format!("savefig({q}{}{q})", bare_filename(&caps[1]))
    });

    let code = to_method_re().replace_all(&code, |caps: &Captures| {
        let q = quote_of(&caps[0]);
        format!(".{}({q}{}{q}", &caps[1], bare_filename(&caps[2]))
    });

    let code = image_save_re().replace_all(&code, |caps: &Captures| {
        let q = quote_of(&caps[0]);
        format!(".save({q}{}{q}", bare_filename(&caps[1]))
    });

    let code = open_write_re().replace_all(&code, |caps: &Captures| {
        let mode = &caps[2];
        // Read-mode opens may legitimately point anywhere the host allows.
        if !mode.contains('w') && !mode.contains('a') {
            return caps[0].to_string();
        }
        let q = quote_of(&caps[0]);
        format!("open({q}{}{q}, {q}{mode}{q}", bare_filename(&caps[1]))
    });

    if code != original {
        info!("model code paths rewritten to workspace-local filenames");
    }
    code.into_owned()
}

/// Fix the common `moviepy.edit` misspelling of `moviepy.editor`.
pub fn harmonize_imports(code: &str) -> String {
    let original = code;
    let code = moviepy_from_re().replace_all(code, "from moviepy.editor");
    let code = moviepy_import_as_re().replace_all(&code, "import moviepy.editor as $1");
    let code = moviepy_import_re().replace_all(&code, "import moviepy.editor");
    if code != original {
        info!("harmonized moviepy.edit import to moviepy.editor");
    }
    code.into_owned()
}

/// Extract a fenced Python block (preferring ```python) from free text.
/// Used as a fallback when the model called the code tool without a `code`
/// argument but put the code in its message body.
pub fn extract_fenced_code(text: &str) -> Option<String> {
    if let Some(caps) = python_fence_re().captures(text) {
        return Some(caps[1].trim().to_string());
    }
    any_fence_re()
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
}

/// A filename is workspace-safe when it carries no directory component.
pub fn validate_filename(filename: &str) -> Result<(), String> {
    if filename.is_empty() {
        return Err("filename is empty".to_string());
    }
    if filename.starts_with('/') || filename.starts_with('\\') {
        return Err(format!("absolute path not allowed: {filename}"));
    }
    if filename.contains("..") {
        return Err(format!("parent traversal not allowed: {filename}"));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(format!("only bare filenames allowed: {filename}"));
    }
    Ok(())
}
