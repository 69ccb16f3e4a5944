//! Display names of proxy indexes.
//!
//! A proxy is named after the joining dimension and its source. Prefixes on
//! the joining dimension's name tune the composition:
//!
//! | join name  | legacy domain         | versioned domain      |
//! |------------|-----------------------|-----------------------|
//! | `Region`   | `Region City`         | `Region City`         |
//! | `_Region`  | `City`                | `Region City`         |
//! | `__Region` | `City`                | `City`                |
//! | `>Region`  | `City`, path `Region` | `City`, path `Region` |

use crate::index::DisplayName;

/// How a joining dimension name is composed into its proxies' names.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JoinName<'a> {
    label: &'a str,
    hidden: bool,
}

fn parse_join_name(join_name: &str, versioned: bool) -> JoinName<'_> {
    if let Some(rest) = join_name.strip_prefix('>') {
        return JoinName {
            label: rest.trim(),
            hidden: true,
        };
    }
    if versioned {
        if let Some(rest) = join_name.strip_prefix("__") {
            return JoinName {
                label: rest,
                hidden: true,
            };
        }
        if let Some(rest) = join_name.strip_prefix('_') {
            return JoinName {
                label: rest,
                hidden: false,
            };
        }
    } else if let Some(rest) = join_name.strip_prefix('_') {
        return JoinName {
            label: rest,
            hidden: true,
        };
    }
    JoinName {
        label: join_name,
        hidden: false,
    }
}

/// Name a proxy created for `source` through the join dimension `join_name`.
///
/// `versioned` selects the prefix convention of the joining domain.
pub fn proxy_display(join_name: &str, source: &DisplayName, versioned: bool) -> DisplayName {
    let join = parse_join_name(join_name, versioned);
    let path = if source.path.is_empty() {
        join.label.to_string()
    } else {
        format!("{}/{}", join.label, source.path)
    };
    if join.hidden || join.label.is_empty() {
        DisplayName {
            name: source.name.clone(),
            path,
            composite: false,
        }
    } else {
        DisplayName {
            name: format!("{} {}", join.label, source.name),
            path,
            composite: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city() -> DisplayName {
        DisplayName {
            name: "City".into(),
            path: String::new(),
            composite: false,
        }
    }

    #[test]
    fn test_plain_join_composes() {
        let name = proxy_display("Region", &city(), false);
        assert_eq!(name.name, "Region City");
        assert!(name.composite);
        assert_eq!(name.path, "Region");
    }

    #[test]
    fn test_legacy_underscore_hides_join() {
        let name = proxy_display("_Region", &city(), false);
        assert_eq!(name.name, "City");
        assert!(!name.composite);
        assert_eq!(name.path, "Region");
    }

    #[test]
    fn test_versioned_prefixes() {
        let single = proxy_display("_Region", &city(), true);
        assert_eq!(single.name, "Region City");
        assert!(single.composite);

        let double = proxy_display("__Region", &city(), true);
        assert_eq!(double.name, "City");
        assert!(!double.composite);
    }

    #[test]
    fn test_grouping_prefix_and_nested_path() {
        let nested = DisplayName {
            name: "Store City".into(),
            path: "Store".into(),
            composite: true,
        };
        let name = proxy_display(">Order", &nested, true);
        assert_eq!(name.name, "Store City");
        assert!(!name.composite);
        assert_eq!(name.path, "Order/Store");
    }
}
