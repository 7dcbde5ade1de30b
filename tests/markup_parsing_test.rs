use dropdown_nav::{Error, HOVER_STYLE_RULE, Harness, Result};

#[test]
fn void_and_self_closing_tags_do_not_swallow_siblings() -> Result<()> {
    let html = r#"
        <img src='logo.png'>
        <br/>
        <input name='q'>
        <button id='after' class='dropdown-trigger'>Products</button>
    "#;

    let h = Harness::from_html(html)?;
    h.assert_exists("#after")?;
    h.assert_cursor("#after", "pointer")?;
    Ok(())
}

#[test]
fn boolean_and_unquoted_attributes_parse() -> Result<()> {
    let html = "<button disabled class=dropdown-trigger id=btn>Products</button>";

    let h = Harness::from_html(html)?;
    h.assert_exists("button[disabled]")?;
    h.assert_exists("[class=dropdown-trigger]")?;
    h.assert_cursor("#btn", "pointer")?;
    Ok(())
}

#[test]
fn mismatched_end_tags_close_open_elements() -> Result<()> {
    let html = "<div><span id='s'>x</div><p id='p'>y</p>";

    let h = Harness::from_html(html)?;
    h.assert_exists("#s")?;
    h.assert_exists("#p")?;
    // The stray </div> closed the span, so the paragraph is a sibling.
    assert!(!h.dump_dom("div")?.contains("<p"));
    Ok(())
}

#[test]
fn raw_style_text_is_preserved_verbatim() -> Result<()> {
    let html =
        "<style>.dropdown-content{display:none}</style><div class='dropdown-content'></div>";

    let h = Harness::from_html(html)?;
    let texts = h.style_texts();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], ".dropdown-content{display:none}");
    assert_eq!(texts[1], HOVER_STYLE_RULE);
    Ok(())
}

#[test]
fn universal_and_child_selectors_work() -> Result<()> {
    let h = Harness::from_html("<main id='m'><p>hello</p></main>")?;
    h.assert_exists("*")?;
    h.assert_exists("main > p")?;
    assert!(matches!(
        h.assert_exists("p > main"),
        Err(Error::SelectorNotFound(_))
    ));
    Ok(())
}

#[test]
fn unclosed_raw_text_element_is_rejected() {
    assert!(matches!(
        Harness::from_html("<style>.a{display:none}"),
        Err(Error::HtmlParse(_))
    ));
    assert!(matches!(
        Harness::from_html("<script>let x = 1;"),
        Err(Error::HtmlParse(_))
    ));
}

#[test]
fn uppercase_tags_and_attribute_names_are_normalized() -> Result<()> {
    let html = "<DIV CLASS='dropdown-trigger' ID='t'>Products</DIV>";

    let h = Harness::from_html(html)?;
    h.assert_exists("div.dropdown-trigger")?;
    h.assert_cursor("#t", "pointer")?;
    Ok(())
}

#[test]
fn quoted_attribute_values_may_contain_angle_brackets() -> Result<()> {
    let html = "<div id='x' title='a > b'></div>";

    let h = Harness::from_html(html)?;
    h.assert_exists("[title='a > b']")?;
    Ok(())
}
