use dropdown_nav::{FALLBACK_NAV_HREF, Harness, Result};

const PRODUCT_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Acme Store</title>
  <style>
    /* site chrome */
    .dropdown-content, .flyout{display:none}
    nav a{display:inline-block}
  </style>
</head>
<body>
  <nav id='top-nav'>
    <a id='home' href='index.html'>Home</a>
    <div id='products-menu' class='dropdown-wrapper'>
      <span id='products' class='dropdown-trigger'>Products</span>
      <div id='products-panel' class='dropdown-content'>
        <a id='widgets' href='widgets.html'>Widgets</a>
        <a id='gadgets' href='gadgets.html'>Gadgets</a>
      </div>
    </div>
    <a id='catalog' class='dropdown-trigger' href='catalog.html'>Catalog</a>
  </nav>
  <main><p>Welcome.</p></main>
</body>
</html>
"#;

#[test]
fn menu_opens_on_hover_and_closes_when_hover_moves_away() -> Result<()> {
    let mut h = Harness::from_html(PRODUCT_PAGE)?;

    h.assert_computed_display("#products-panel", "none")?;

    h.hover("#products-menu")?;
    h.assert_computed_display("#products-panel", "block")?;

    h.hover("#home")?;
    h.assert_computed_display("#products-panel", "none")?;
    Ok(())
}

#[test]
fn hovering_a_menu_item_keeps_the_menu_open() -> Result<()> {
    let mut h = Harness::from_html(PRODUCT_PAGE)?;

    h.hover("#widgets")?;
    h.assert_computed_display("#products-panel", "block")?;
    Ok(())
}

#[test]
fn span_trigger_navigates_to_the_product_page() -> Result<()> {
    let mut h = Harness::from_html(PRODUCT_PAGE)?;

    h.assert_cursor("#products", "pointer")?;
    h.click("#products")?;
    h.assert_location(FALLBACK_NAV_HREF)?;
    assert_eq!(h.listener_count(), 0);
    Ok(())
}

#[test]
fn link_trigger_keeps_its_own_destination() -> Result<()> {
    let mut h = Harness::from_html(PRODUCT_PAGE)?;

    h.assert_cursor("#catalog", "pointer")?;
    h.click("#catalog")?;
    h.assert_location("catalog.html")?;
    Ok(())
}

#[test]
fn menu_item_click_navigates_to_the_item_target() -> Result<()> {
    let mut h = Harness::from_html(PRODUCT_PAGE)?;

    h.hover("#products-menu")?;
    h.click("#widgets")?;
    h.assert_location("widgets.html")?;
    Ok(())
}

#[test]
fn plain_links_are_untouched_by_the_behavior() -> Result<()> {
    let mut h = Harness::from_html(PRODUCT_PAGE)?;

    h.assert_cursor("#home", "auto")?;
    h.click("#home")?;
    h.assert_location("index.html")?;
    Ok(())
}

#[test]
fn attribute_selectors_can_address_menu_items() -> Result<()> {
    let h = Harness::from_html(PRODUCT_PAGE)?;

    h.assert_exists("a[href='widgets.html']")?;
    h.assert_exists("#products-panel > a[href]")?;
    Ok(())
}

#[test]
fn only_the_two_triggers_are_bound() -> Result<()> {
    let h = Harness::from_html(PRODUCT_PAGE)?;
    assert_eq!(h.listener_count(), 2);
    Ok(())
}
