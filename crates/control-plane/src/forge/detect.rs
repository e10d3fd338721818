//! Framework detection from a directory listing plus a parsed
//! `package.json`. A config-file match beats a dependency match; rules are
//! evaluated in table order and the first hit wins.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    NextJs,
    Vite,
    Elysia,
    Hono,
    Express,
    Unknown,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::NextJs => "nextjs",
            Framework::Vite => "vite",
            Framework::Elysia => "elysia",
            Framework::Hono => "hono",
            Framework::Express => "express",
            Framework::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Detected {
    pub framework: Framework,
    pub confidence: &'static str,
    pub reason: String,
}

/// UI metadata for a detected framework.
#[derive(Debug, Clone, Serialize)]
pub struct FrameworkInfo {
    pub name: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
}

struct Rule {
    framework: Framework,
    config_files: &'static [&'static str],
    dependencies: &'static [&'static str],
}

const RULES: &[Rule] = &[
    Rule {
        framework: Framework::NextJs,
        config_files: &["next.config.js", "next.config.ts", "next.config.mjs"],
        dependencies: &["next"],
    },
    Rule {
        framework: Framework::Vite,
        config_files: &["vite.config.js", "vite.config.ts", "vite.config.mjs"],
        dependencies: &["vite"],
    },
    Rule {
        framework: Framework::Elysia,
        config_files: &[],
        dependencies: &["elysia"],
    },
    Rule {
        framework: Framework::Hono,
        config_files: &[],
        dependencies: &["hono"],
    },
    Rule {
        framework: Framework::Express,
        config_files: &[],
        dependencies: &["express"],
    },
];

pub fn detect_framework(files: &[String], package_json: &Value) -> Detected {
    let has_dep = |name: &str| {
        ["dependencies", "devDependencies"].iter().any(|section| {
            package_json
                .get(section)
                .and_then(|deps| deps.get(name))
                .is_some()
        })
    };

    for rule in RULES {
        for config_file in rule.config_files {
            if files.iter().any(|f| f == config_file) {
                return Detected {
                    framework: rule.framework,
                    confidence: "high",
                    reason: format!("Found {config_file}"),
                };
            }
        }

        for dep in rule.dependencies {
            if has_dep(dep) {
                return Detected {
                    framework: rule.framework,
                    confidence: "medium",
                    reason: format!("Found dependency: {dep}"),
                };
            }
        }
    }

    Detected {
        framework: Framework::Unknown,
        confidence: "low",
        reason: "No framework detected".to_string(),
    }
}

pub fn display_info(framework: Framework) -> FrameworkInfo {
    match framework {
        Framework::NextJs => FrameworkInfo {
            name: "Next.js",
            icon: "nextjs",
            color: "#000000",
        },
        Framework::Vite => FrameworkInfo {
            name: "Vite",
            icon: "vite",
            color: "#646CFF",
        },
        Framework::Express => FrameworkInfo {
            name: "Express",
            icon: "express",
            color: "#000000",
        },
        Framework::Hono => FrameworkInfo {
            name: "Hono",
            icon: "hono",
            color: "#E36002",
        },
        Framework::Elysia => FrameworkInfo {
            name: "Elysia",
            icon: "elysia",
            color: "#7C3AED",
        },
        Framework::Unknown => FrameworkInfo {
            name: "Unknown",
            icon: "folder",
            color: "#6B7280",
        },
    }
}

/// Directories that conventionally hold monorepo members.
pub fn is_monorepo_dir(name: &str) -> bool {
    matches!(name, "packages" | "apps" | "services" | "projects")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn config_file_gives_high_confidence() {
        let detected = detect_framework(
            &files(&["package.json", "next.config.ts", "src"]),
            &json!({}),
        );
        assert_eq!(detected.framework, Framework::NextJs);
        assert_eq!(detected.confidence, "high");
    }

    #[test]
    fn dependency_gives_medium_confidence() {
        let detected = detect_framework(
            &files(&["package.json"]),
            &json!({ "dependencies": { "hono": "^4.0.0" } }),
        );
        assert_eq!(detected.framework, Framework::Hono);
        assert_eq!(detected.confidence, "medium");
    }

    #[test]
    fn dev_dependencies_count() {
        let detected = detect_framework(
            &files(&["package.json"]),
            &json!({ "devDependencies": { "vite": "^5.0.0" } }),
        );
        assert_eq!(detected.framework, Framework::Vite);
    }

    #[test]
    fn config_file_beats_dependency_of_later_rule() {
        // vite config file present while express is a dependency: the vite
        // rule's config match fires first.
        let detected = detect_framework(
            &files(&["vite.config.ts"]),
            &json!({ "dependencies": { "express": "^4.0.0" } }),
        );
        assert_eq!(detected.framework, Framework::Vite);
        assert_eq!(detected.confidence, "high");
    }

    #[test]
    fn table_order_breaks_dependency_ties() {
        // next and vite both present as dependencies: nextjs is listed first.
        let detected = detect_framework(
            &files(&["package.json"]),
            &json!({ "dependencies": { "vite": "^5", "next": "^14" } }),
        );
        assert_eq!(detected.framework, Framework::NextJs);
    }

    #[test]
    fn nothing_matches_is_unknown_low() {
        let detected = detect_framework(&files(&["README.md"]), &json!({}));
        assert_eq!(detected.framework, Framework::Unknown);
        assert_eq!(detected.confidence, "low");
    }

    #[test]
    fn monorepo_dirs() {
        assert!(is_monorepo_dir("packages"));
        assert!(is_monorepo_dir("apps"));
        assert!(is_monorepo_dir("services"));
        assert!(is_monorepo_dir("projects"));
        assert!(!is_monorepo_dir("src"));
    }
}
