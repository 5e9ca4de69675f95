//! Integration tests for code-shape navigation over a built store.

use hstree::domain::{HierarchyBuilder, HierarchyNavigator, HierarchyRecord};
use hstree::util::testing::{init_test_setup, sample_records};
use regex::Regex;

#[ctor::ctor]
fn init() {
    init_test_setup();
}

#[test]
fn given_chapter_84_when_deriving_children_then_excludes_other_chapters() {
    let navigator = HierarchyNavigator::from_codes(["8401", "8402", "9999"]);

    assert_eq!(navigator.child_codes_of("84"), vec!["8401", "8402"]);
}

#[test]
fn given_store_when_deriving_children_of_every_chapter_then_two_more_digits_and_indexed() {
    let store = HierarchyBuilder::new().build(&sample_records()).unwrap();
    let navigator = HierarchyNavigator::new(&store);

    for chapter in navigator.child_codes_of("") {
        let shape = Regex::new(&format!("^{}[0-9]{{2}}$", regex::escape(&chapter))).unwrap();
        for child in navigator.child_codes_of(&chapter) {
            assert!(shape.is_match(&child), "{child} is not {chapter} + two digits");
            assert!(store.contains(&child));
        }
    }
}

#[test]
fn given_store_when_listing_options_then_resolved_with_descriptions_and_duties() {
    let store = HierarchyBuilder::new().build(&sample_records()).unwrap();
    let navigator = HierarchyNavigator::new(&store);

    let options = navigator.options(&store, "8401.10.00");

    let codes: Vec<_> = options.iter().map(|o| o.code.as_str()).collect();
    assert_eq!(codes, vec!["8401.10.00.10", "8401.10.00.90"]);
    assert_eq!(options[0].description, "For research");
    assert_eq!(options[0].duty_rates.general, "Free");
}

#[test]
fn given_code_outside_built_tree_when_deriving_children_then_uses_code_shape_only() {
    // 8471.30 sits below a group heading in the tree, not below 8471
    let records = vec![
        HierarchyRecord::new("8471", "Automatic data processing machines", 0),
        HierarchyRecord::new("", "Portable machines:", 1).group_heading(),
        HierarchyRecord::new("8471.30", "Weighing not more than 10 kg", 2),
    ];
    let store = HierarchyBuilder::new().build(&records).unwrap();
    let navigator = HierarchyNavigator::new(&store);

    assert_eq!(navigator.child_codes_of("8471"), vec!["8471.30"]);
    assert!(store.lookup("8471").unwrap().children.len() == 1);
    assert!(!navigator.has_children("8471.30"));
}

#[test]
fn given_leaf_and_malformed_codes_when_deriving_children_then_empty() {
    let store = HierarchyBuilder::new().build(&sample_records()).unwrap();
    let navigator = HierarchyNavigator::new(&store);

    assert!(navigator.child_codes_of("8401.10.00.10").is_empty());
    assert!(navigator.child_codes_of("8501").is_empty());
    assert!(navigator.child_codes_of("84-01").is_empty());
}
