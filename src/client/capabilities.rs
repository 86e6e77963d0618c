//! Runtime capability tokens.

const BASELINE: &[&str] = &["Baseline"];

const NET7: &[&str] = &[
    "Baseline",
    "AddMethodToExistingType",
    "AddStaticFieldToExistingType",
    "NewTypeDefinition",
    "ChangeCustomAttributes",
];

const NET8: &[&str] = &[
    "Baseline",
    "AddMethodToExistingType",
    "AddStaticFieldToExistingType",
    "NewTypeDefinition",
    "ChangeCustomAttributes",
    "AddInstanceFieldToExistingType",
    "GenericAddMethodToExistingType",
    "GenericUpdateMethod",
    "UpdateParameters",
    "GenericAddFieldToExistingType",
    "AddExplicitInterfaceImplementation",
];

/// Capabilities of the browser WebAssembly runtime, by framework major
/// version. Unknown versions get nothing, so every update is filtered out.
pub fn browser_fallback(major_version: Option<u32>) -> Vec<String> {
    let tokens: &[&str] = match major_version {
        Some(6) => BASELINE,
        Some(7) => NET7,
        Some(8 | 9) => NET8,
        _ => &[],
    };
    tokens.iter().map(|t| (*t).to_owned()).collect()
}

/// Ordered union: first occurrence wins, duplicates dropped.
pub fn union<'a, I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut seen = rustc_hash::FxHashSet::default();
    let mut merged = Vec::new();
    for token in lists.into_iter().flatten() {
        if seen.insert(token.as_str()) {
            merged.push(token.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_table_sizes() {
        assert_eq!(browser_fallback(Some(6)).len(), 1);
        assert_eq!(browser_fallback(Some(7)).len(), 5);
        assert_eq!(browser_fallback(Some(8)).len(), 11);
        assert_eq!(browser_fallback(Some(9)).len(), 11);
        assert!(browser_fallback(Some(5)).is_empty());
        assert!(browser_fallback(Some(10)).is_empty());
        assert!(browser_fallback(None).is_empty());
    }

    #[test]
    fn test_net8_extends_net7() {
        let net7 = browser_fallback(Some(7));
        let net8 = browser_fallback(Some(8));
        assert_eq!(&net8[..net7.len()], &net7[..]);
        assert_eq!(net8[0], "Baseline");
    }

    #[test]
    fn test_union_keeps_first_order() {
        let a = vec!["Baseline".to_string(), "NewTypeDefinition".to_string()];
        let b = vec!["UpdateParameters".to_string(), "Baseline".to_string()];
        assert_eq!(
            union([a.as_slice(), b.as_slice()]),
            vec!["Baseline", "NewTypeDefinition", "UpdateParameters"]
        );
    }
}
