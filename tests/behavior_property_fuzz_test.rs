use dropdown_nav::{Error, Harness};
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{TestCaseError, TestCaseResult};

const HOST_PAGE: &str = r#"
<style>.dropdown-content{display:none}</style>
<nav>
  <a id='home' href='index.html'>Home</a>
  <div id='menu' class='dropdown-wrapper'>
    <span id='products' class='dropdown-trigger'>Products</span>
    <div id='panel' class='dropdown-content'>
      <a id='widgets' href='widgets.html'>Widgets</a>
    </div>
  </div>
  <a id='catalog' class='dropdown-trigger' href='catalog.html'>Catalog</a>
  <button id='loose' class='dropdown-trigger'>More</button>
</nav>
"#;

const ALLOWED_LOCATIONS: [&str; 5] = [
    "about:blank",
    "product.html",
    "index.html",
    "widgets.html",
    "catalog.html",
];

#[derive(Debug, Clone)]
enum Action {
    Click(&'static str),
    Hover(&'static str),
    ClearHover,
    Dispatch(&'static str, &'static str),
}

fn selector_strategy() -> BoxedStrategy<&'static str> {
    prop_oneof![
        Just("#home"),
        Just("#menu"),
        Just("#products"),
        Just("#panel"),
        Just("#widgets"),
        Just("#catalog"),
        Just("#loose"),
        Just(".dropdown-trigger"),
        Just(".dropdown-content a"),
        Just("nav > div"),
        Just("#missing"),
    ]
    .boxed()
}

fn action_strategy() -> BoxedStrategy<Action> {
    let event = prop_oneof![Just("mouseover"), Just("focus"), Just("click")];

    prop_oneof![
        selector_strategy().prop_map(Action::Click),
        selector_strategy().prop_map(Action::Hover),
        Just(Action::ClearHover),
        (selector_strategy(), event).prop_map(|(selector, name)| Action::Dispatch(selector, name)),
    ]
    .boxed()
}

fn run_actions(actions: &[Action]) -> TestCaseResult {
    let mut harness = match Harness::from_html(HOST_PAGE) {
        Ok(harness) => harness,
        Err(error) => return Err(TestCaseError::fail(format!("host page rejected: {error}"))),
    };

    for action in actions {
        let outcome = match action {
            Action::Click(selector) => harness.click(selector),
            Action::Hover(selector) => harness.hover(selector),
            Action::ClearHover => {
                harness.clear_hover();
                Ok(())
            }
            Action::Dispatch(selector, event) => harness.dispatch(selector, event),
        };

        if let Err(error) = outcome {
            prop_assert!(
                matches!(error, Error::SelectorNotFound(_)),
                "unexpected error for {action:?}: {error}"
            );
        }

        prop_assert!(
            ALLOWED_LOCATIONS.contains(&harness.location()),
            "unexpected location after {action:?}: {}",
            harness.location()
        );

        let display = match harness.computed_display("#panel") {
            Ok(display) => display,
            Err(error) => {
                return Err(TestCaseError::fail(format!(
                    "computed display failed after {action:?}: {error}"
                )));
            }
        };
        prop_assert!(
            display == "none" || display == "block",
            "unexpected panel display after {action:?}: {display}"
        );
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn random_action_sequences_hold_invariants(actions in vec(action_strategy(), 0..40)) {
        run_actions(&actions)?;
    }
}
