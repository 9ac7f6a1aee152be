//! SEARCH/SORT/THREAD command-text builders (spec §1: "command text
//! generation only; response handling stays in scope").
//!
//! The planner always exercises the simplest legal criterion (`ALL`) since
//! generating interesting search criteria is itself out of scope; these
//! functions exist so the text-generation seam is named and isolated the
//! way the spec requires, rather than inlined into the reply router.

#[must_use]
pub fn build_search() -> String {
    "SEARCH ALL".to_string()
}

#[must_use]
pub fn build_sort() -> String {
    "SORT (ARRIVAL) UTF-8 ALL".to_string()
}

#[must_use]
pub fn build_thread() -> String {
    "THREAD REFERENCES UTF-8 ALL".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_emit_all_criterion() {
        assert_eq!(build_search(), "SEARCH ALL");
        assert!(build_sort().ends_with("ALL"));
        assert!(build_thread().ends_with("ALL"));
    }
}
