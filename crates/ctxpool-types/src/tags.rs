/// The reserved tag that disables eviction for a context (spec §3).
pub const PROTECTED_TAG: &str = "protected";

/// Whether `tags` makes a context eligible for a request requiring
/// `required_tags` (spec §4.5 step 1: `c.tags ⊇ request.required_tags`).
pub fn satisfies(tags: &std::collections::BTreeSet<String>, required: &std::collections::BTreeSet<String>) -> bool {
    required.is_subset(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn subset_check() {
        assert!(satisfies(&set(&["premium", "eu"]), &set(&["premium"])));
        assert!(satisfies(&set(&["premium"]), &set(&[])));
        assert!(!satisfies(&set(&["basic"]), &set(&["premium"])));
    }
}
