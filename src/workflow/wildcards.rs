//! Wildcard Patterns and Expansion
//!
//! Paths and task identities are templated over named wildcards such as
//! `{seed}`, `{chrom}` and `{n}`. A rule declares the dimensions it is
//! expanded over; [`expand_bindings`] enumerates their Cartesian product
//! and [`substitute`] fills a pattern from one set of bindings.

use std::collections::BTreeMap;

use log::debug;

/// Concrete values for the wildcards of one task instance.
pub type Bindings = BTreeMap<String, String>;

/// Extracts wildcard names from a pattern.
///
/// # Example
/// ```
/// use nerunner::workflow::wildcards::extract_wildcard_names;
///
/// let names = extract_wildcard_names("Intermediate/{seed}/{chrom}.vcf");
/// assert_eq!(names, vec!["seed", "chrom"]);
/// ```
pub fn extract_wildcard_names(pattern: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_wildcard = false;
    let mut current_name = String::new();

    for ch in pattern.chars() {
        match ch {
            '{' => {
                in_wildcard = true;
                current_name.clear();
            }
            '}' => {
                if in_wildcard && !current_name.is_empty() {
                    names.push(current_name.clone());
                    current_name.clear();
                }
                in_wildcard = false;
            }
            _ => {
                if in_wildcard {
                    current_name.push(ch);
                }
            }
        }
    }

    names
}

/// Fills every wildcard of `pattern` from `bindings`.
///
/// Fails if the pattern names a wildcard that has no binding.
pub fn substitute(pattern: &str, bindings: &Bindings) -> Result<String, String> {
    let mut result = pattern.to_string();

    for name in extract_wildcard_names(pattern) {
        let value = bindings
            .get(&name)
            .ok_or_else(|| format!("Pattern '{}': wildcard '{{{}}}' is not bound", pattern, name))?;
        result = substitute_wildcard(&result, &name, value);
    }

    Ok(result)
}

/// Enumerates the Cartesian product of the given dimensions.
///
/// Dimensions are varied right-most fastest, so the first dimension is the
/// outermost loop. No dimensions yield exactly one empty binding; any empty
/// dimension yields nothing.
///
/// # Example
/// ```
/// use nerunner::workflow::wildcards::expand_bindings;
///
/// let seeds = vec!["1".to_string(), "2".to_string()];
/// let chroms = vec!["chr1".to_string()];
/// let all = expand_bindings(&[("seed", &seeds[..]), ("chrom", &chroms[..])]);
/// assert_eq!(all.len(), 2);
/// assert_eq!(all[1]["seed"], "2");
/// ```
pub fn expand_bindings(dimensions: &[(&str, &[String])]) -> Vec<Bindings> {
    let mut product = vec![Bindings::new()];

    for (name, values) in dimensions {
        product = product
            .into_iter()
            .flat_map(|partial| {
                values.iter().map(move |value| {
                    let mut bindings = partial.clone();
                    bindings.insert(name.to_string(), value.clone());
                    bindings
                })
            })
            .collect();
    }

    debug!(
        "Expanded {:?} into {} binding(s)",
        dimensions.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
        product.len()
    );

    product
}

/// Renders bindings in the order they are keyed, e.g. `chrom=chr1,seed=7`.
pub fn format_bindings(bindings: &Bindings) -> String {
    bindings
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Substitutes a wildcard in a string with a concrete value.
fn substitute_wildcard(text: &str, wildcard_name: &str, value: &str) -> String {
    text.replace(&format!("{{{}}}", wildcard_name), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_wildcard_names() {
        let names = extract_wildcard_names("{chrom}.{n}.multihetsep.txt");
        assert_eq!(names, vec!["chrom", "n"]);
        assert!(extract_wildcard_names("plain.txt").is_empty());
    }

    #[test]
    fn test_substitute() {
        let mut bindings = Bindings::new();
        bindings.insert("seed".to_string(), "42".to_string());
        bindings.insert("chrom".to_string(), "chr1".to_string());

        let path = substitute("Intermediate/{seed}/{chrom}.trees", &bindings).unwrap();
        assert_eq!(path, "Intermediate/42/chr1.trees");

        let err = substitute("{seed}/{n}.txt", &bindings).unwrap_err();
        assert!(err.contains("{n}"));
    }

    #[test]
    fn test_expand_bindings_cartesian_product() {
        let seeds = strings(&["1", "2"]);
        let chroms = strings(&["chr1", "chr2", "chr3"]);
        let sizes = strings(&["4", "8"]);

        let all =
            expand_bindings(&[("seed", &seeds[..]), ("chrom", &chroms[..]), ("n", &sizes[..])]);
        assert_eq!(all.len(), 12);

        // Outermost dimension first
        assert_eq!(all[0]["seed"], "1");
        assert_eq!(all[11]["seed"], "2");
        assert_eq!(all[0]["n"], "4");
        assert_eq!(all[1]["n"], "8");
    }

    #[test]
    fn test_expand_bindings_edge_cases() {
        assert_eq!(expand_bindings(&[]), vec![Bindings::new()]);

        let empty: Vec<String> = Vec::new();
        let seeds = strings(&["1"]);
        assert!(expand_bindings(&[("seed", &seeds[..]), ("chrom", &empty[..])]).is_empty());
    }

    #[test]
    fn test_format_bindings() {
        let (seeds, chroms) = (strings(&["7"]), strings(&["chr1"]));
        let all = expand_bindings(&[("seed", &seeds[..]), ("chrom", &chroms[..])]);
        assert_eq!(format_bindings(&all[0]), "chrom=chr1,seed=7");
    }
}
