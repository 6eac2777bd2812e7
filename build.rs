use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding this crate's own Rust sources. Anything else under the
// package root (vendored data, reference material, target/) is not linted.
const SOURCE_DIRS: [&str; 5] = ["calibrate", "cli", "src", "tests", "benches"];

// Words that may not appear in any comment, doc comments included.
const FORBIDDEN_WORDS: &str = "FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

#[derive(Clone, Copy)]
enum Lint {
    UnderscorePrefix,
    ForbiddenWord,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Lint {
    fn pattern(self) -> String {
        match self {
            Lint::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Lint::ForbiddenWord => format!(r"(//|/\*|///).*(?:{FORBIDDEN_WORDS})"),
            Lint::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Lint::AllCapsComment => r"(//|/\*|///).*".to_string(),
            Lint::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn headline(self) -> &'static str {
        match self {
            Lint::UnderscorePrefix => "underscore-prefixed variables",
            Lint::ForbiddenWord => "forbidden comment patterns",
            Lint::StarsInComment => "'**' sequences in regular comments",
            Lint::AllCapsComment => "comments with all uppercase alphabetic characters",
            Lint::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Lint::UnderscorePrefix => {
                "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely."
            }
            Lint::ForbiddenWord => {
                "Comments containing change-log words (FIX, NEW, UPDATE and their variants) are STRICTLY FORBIDDEN.\n   Remove them completely rather than commenting them out."
            }
            Lint::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (but is allowed in /// doc comments)."
            }
            Lint::AllCapsComment => {
                "Comments where all alphabetic characters are uppercase are STRICTLY FORBIDDEN.\n   STRONGLY CONSIDER deleting the comment completely."
            }
            Lint::AllowDeadCode => {
                "#[allow(dead_code)] attributes are STRICTLY FORBIDDEN in this project.\n   Either use the code (removing the attribute) or remove it completely."
            }
        }
    }

    // The build script itself is exempt from the comment lints; its own messages
    // quote the forbidden words.
    fn skips_build_script(self) -> bool {
        !matches!(self, Lint::UnderscorePrefix)
    }

    /// Decides whether a line matched by the regex is a real violation.
    fn is_violation(self, line: &str) -> bool {
        match self {
            Lint::UnderscorePrefix => !is_comment(line) && !underscore_only_in_strings(line),
            Lint::ForbiddenWord | Lint::AllowDeadCode => true,
            Lint::StarsInComment => !is_doc_comment(line),
            Lint::AllCapsComment => comment_text(line).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(|c| c.is_uppercase())
            }),
        }
    }
}

// Collects every violating line of a single file.
struct LintCollector {
    lint: Lint,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl LintCollector {
    fn new(lint: Lint, file_path: &Path) -> Self {
        Self {
            lint,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.lint.headline(),
            self.file_path.display()
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.lint.advice()));
        Some(error_msg)
    }
}

impl Sink for LintCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.lint.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with("//")
        || (line.contains("/*") && !line.contains("*/match") && !line.contains("*/let"))
}

// True when every underscore-prefixed token on the line sits inside a string literal.
fn underscore_only_in_strings(line: &str) -> bool {
    if !line.contains('"') {
        return false;
    }
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

// The text of a comment line without its marker.
fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        return Some(rest.trim());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim());
    }
    let start = line.find("/*")? + 2;
    Some(match line[start..].find("*/") {
        Some(end) => line[start..start + end].trim(),
        None => line[start..].trim(),
    })
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    let dirs = SOURCE_DIRS
        .into_iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path())
        });
    std::iter::once(PathBuf::from("build.rs")).chain(dirs)
}

fn run_lint(lint: Lint) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&lint.pattern())?;
    let mut searcher = Searcher::new();
    for path in rust_sources() {
        if lint.skips_build_script() && path == Path::new("build.rs") {
            continue;
        }
        if std::fs::read_to_string(&path).is_err() {
            continue;
        }
        let mut collector = LintCollector::new(lint, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let lints = [
        Lint::UnderscorePrefix,
        Lint::ForbiddenWord,
        Lint::StarsInComment,
        Lint::AllCapsComment,
        Lint::AllowDeadCode,
    ];
    for lint in lints {
        if let Err(e) = run_lint(lint) {
            // The `eprintln!` here is what shows the violation in cargo's output.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
