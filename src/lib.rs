use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    StyleParse(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    Config(String),
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::StyleParse(msg) => write!(f, "style parse error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

pub const HOVER_STYLE_RULE: &str =
    ".dropdown-wrapper:hover .dropdown-content{display:block!important}";
pub const TRIGGER_SELECTOR: &str = ".dropdown-trigger";
pub const FALLBACK_NAV_HREF: &str = "product.html";

const START_LOCATION: &str = "about:blank";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node_type: NodeType,
}

#[derive(Debug, Clone)]
struct Element {
    tag_name: String,
    attrs: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    id_index: HashMap<String, NodeId>,
}

impl Dom {
    fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
        }
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let id = self.create_node(Some(parent), NodeType::Element(Element { tag_name, attrs }));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            if !id_attr.is_empty() {
                self.id_index.insert(id_attr, id);
            }
        }
        id
    }

    fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes[node_id.0].parent
    }

    fn is_descendant_of(&self, node_id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(node_id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|e| e.attrs.get(name).cloned())
    }

    fn text_content(&self, node_id: NodeId) -> String {
        stacker::grow(32 * 1024 * 1024, || self.text_content_inner(node_id))
    }

    fn text_content_inner(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document | NodeType::Element(_) => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.text_content_inner(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
        }
    }

    fn style_property(&self, node_id: NodeId, name: &str) -> Option<String> {
        let element = self.element(node_id)?;
        parse_style_declarations(element.attrs.get("style").map(String::as_str))
            .into_iter()
            .find(|(decl_name, _)| decl_name == name)
            .map(|(_, value)| value)
    }

    fn set_style_property(&mut self, node_id: NodeId, name: &str, value: &str) {
        let Some(element) = self.element_mut(node_id) else {
            return;
        };
        let current = element.attrs.get("style").cloned();
        let mut decls = parse_style_declarations(current.as_deref());
        let name = name.to_ascii_lowercase();
        if let Some(pos) = decls.iter().position(|(decl_name, _)| decl_name == &name) {
            decls[pos].1 = value.to_string();
        } else {
            decls.push((name, value.to_string()));
        }
        element
            .attrs
            .insert("style".to_string(), serialize_style_declarations(&decls));
    }

    fn head(&mut self) -> NodeId {
        if let Some(head) = self.elements_by_tag("head").into_iter().next() {
            return head;
        }
        let parent = self
            .elements_by_tag("html")
            .into_iter()
            .next()
            .unwrap_or(self.root);
        self.create_element(parent, "head".to_string(), HashMap::new())
    }

    fn elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.all_element_nodes()
            .into_iter()
            .filter(|node| {
                self.tag_name(*node)
                    .is_some_and(|t| t.eq_ignore_ascii_case(tag))
            })
            .collect()
    }

    fn query_selector(&self, selector: &str, hovered: Option<NodeId>) -> Result<Option<NodeId>> {
        let all = self.query_selector_all(selector, hovered)?;
        Ok(all.into_iter().next())
    }

    fn query_selector_all(&self, selector: &str, hovered: Option<NodeId>) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;

        if groups.len() == 1 && groups[0].len() == 1 {
            if let Some(id) = groups[0][0].step.id_only() {
                return Ok(self.by_id(id).into_iter().collect());
            }
        }

        let ids = self.all_element_nodes();

        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for candidate in ids {
            if groups
                .iter()
                .any(|steps| self.matches_selector_chain(candidate, steps, hovered))
                && seen.insert(candidate)
            {
                matched.push(candidate);
            }
        }
        Ok(matched)
    }

    fn all_element_nodes(&self) -> Vec<NodeId> {
        stacker::grow(32 * 1024 * 1024, || {
            let mut out = Vec::new();
            self.collect_elements_dfs(self.root, &mut out);
            out
        })
    }

    fn collect_elements_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        if matches!(self.nodes[node_id.0].node_type, NodeType::Element(_)) {
            out.push(node_id);
        }
        for child in &self.nodes[node_id.0].children {
            self.collect_elements_dfs(*child, out);
        }
    }

    fn matches_selector_chain(
        &self,
        node_id: NodeId,
        steps: &[SelectorPart],
        hovered: Option<NodeId>,
    ) -> bool {
        if steps.is_empty() {
            return false;
        }
        if !self.matches_step(node_id, &steps[steps.len() - 1].step, hovered) {
            return false;
        }

        let mut current = node_id;
        for idx in (1..steps.len()).rev() {
            let prev_step = &steps[idx - 1].step;
            let combinator = steps[idx]
                .combinator
                .unwrap_or(SelectorCombinator::Descendant);

            let matched = match combinator {
                SelectorCombinator::Child => {
                    let Some(parent) = self.parent(current) else {
                        return false;
                    };
                    if self.matches_step(parent, prev_step, hovered) {
                        Some(parent)
                    } else {
                        None
                    }
                }
                SelectorCombinator::Descendant => {
                    let mut cursor = self.parent(current);
                    let mut found = None;
                    while let Some(parent) = cursor {
                        if self.matches_step(parent, prev_step, hovered) {
                            found = Some(parent);
                            break;
                        }
                        cursor = self.parent(parent);
                    }
                    found
                }
            };

            let Some(matched) = matched else {
                return false;
            };
            current = matched;
        }

        true
    }

    fn matches_step(&self, node_id: NodeId, step: &SelectorStep, hovered: Option<NodeId>) -> bool {
        let Some(element) = self.element(node_id) else {
            return false;
        };

        if !step.universal {
            if let Some(tag) = &step.tag {
                if !element.tag_name.eq_ignore_ascii_case(tag) {
                    return false;
                }
            }
        } else if step.tag.is_some() {
            return false;
        }

        if let Some(id) = &step.id {
            if element.attrs.get("id") != Some(id) {
                return false;
            }
        }

        if step
            .classes
            .iter()
            .any(|class_name| !has_class(element, class_name))
        {
            return false;
        }

        for cond in &step.attrs {
            let matched = match cond {
                SelectorAttrCondition::Exists { key } => element.attrs.contains_key(key),
                SelectorAttrCondition::Eq { key, value } => element.attrs.get(key) == Some(value),
            };
            if !matched {
                return false;
            }
        }

        for pseudo in &step.pseudo_classes {
            let matched = match pseudo {
                // Hover covers the hovered element and every ancestor of it.
                SelectorPseudoClass::Hover => {
                    hovered.is_some_and(|h| h == node_id || self.is_descendant_of(h, node_id))
                }
            };
            if !matched {
                return false;
            }
        }

        true
    }

    fn dump_node(&self, node_id: NodeId) -> String {
        stacker::grow(32 * 1024 * 1024, || self.dump_node_inner(node_id))
    }

    fn dump_node_inner(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node_inner(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
            NodeType::Element(element) => {
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                let mut attrs: Vec<_> = element.attrs.iter().collect();
                attrs.sort_by(|a, b| a.0.cmp(b.0));
                for (k, v) in attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(v);
                    out.push('"');
                }
                out.push('>');
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node_inner(*child));
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
                out
            }
        }
    }
}

fn has_class(element: &Element, class_name: &str) -> bool {
    element
        .attrs
        .get("class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

fn parse_style_declarations(style_attr: Option<&str>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let Some(style_attr) = style_attr else {
        return out;
    };

    for decl in style_attr.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((name, value)) = decl.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.trim().to_string();
        if let Some(pos) = out.iter().position(|(existing, _)| existing == &name) {
            out[pos].1 = value;
        } else {
            out.push((name, value));
        }
    }

    out
}

fn serialize_style_declarations(decls: &[(String, String)]) -> String {
    let mut out = String::new();
    for (idx, (name, value)) in decls.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push(';');
    }
    out
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectorAttrCondition {
    Exists { key: String },
    Eq { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectorPseudoClass {
    Hover,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SelectorStep {
    tag: Option<String>,
    universal: bool,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<SelectorAttrCondition>,
    pseudo_classes: Vec<SelectorPseudoClass>,
}

impl SelectorStep {
    fn id_only(&self) -> Option<&str> {
        if !self.universal
            && self.tag.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.pseudo_classes.is_empty()
        {
            self.id.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectorCombinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectorPart {
    step: SelectorStep,
    // Relation to previous (left) selector part.
    combinator: Option<SelectorCombinator>,
}

fn parse_selector_chain(selector: &str) -> Result<Vec<SelectorPart>> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    let tokens = tokenize_selector(selector)?;
    let mut steps = Vec::new();
    let mut pending_combinator: Option<SelectorCombinator> = None;

    for token in tokens {
        if token == ">" {
            if pending_combinator.is_some() || steps.is_empty() {
                return Err(Error::UnsupportedSelector(selector.into()));
            }
            pending_combinator = Some(SelectorCombinator::Child);
            continue;
        }

        let step = parse_selector_step(&token)?;
        let combinator = if steps.is_empty() {
            None
        } else {
            Some(
                pending_combinator
                    .take()
                    .unwrap_or(SelectorCombinator::Descendant),
            )
        };
        steps.push(SelectorPart { step, combinator });
    }

    if steps.is_empty() || pending_combinator.is_some() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    Ok(steps)
}

fn parse_selector_groups(selector: &str) -> Result<Vec<Vec<SelectorPart>>> {
    let groups = split_selector_groups(selector)?;
    let mut parsed = Vec::with_capacity(groups.len());
    for group in groups {
        parsed.push(parse_selector_chain(&group)?);
    }
    Ok(parsed)
}

fn split_selector_groups(selector: &str) -> Result<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth == 0 {
                    return Err(Error::UnsupportedSelector(selector.into()));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            ',' if bracket_depth == 0 => {
                let trimmed = current.trim();
                if trimmed.is_empty() {
                    return Err(Error::UnsupportedSelector(selector.into()));
                }
                groups.push(trimmed.to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if bracket_depth != 0 {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    let trimmed = current.trim();
    if trimmed.is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }
    groups.push(trimmed.to_string());
    Ok(groups)
}

fn tokenize_selector(selector: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;

    for ch in selector.chars() {
        match ch {
            '[' => {
                bracket_depth += 1;
                current.push(ch);
            }
            ']' => {
                if bracket_depth == 0 {
                    return Err(Error::UnsupportedSelector(selector.into()));
                }
                bracket_depth -= 1;
                current.push(ch);
            }
            '>' if bracket_depth == 0 => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
                tokens.push(ch.to_string());
            }
            ch if ch.is_ascii_whitespace() && bracket_depth == 0 => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if bracket_depth != 0 {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    if !current.trim().is_empty() {
        tokens.push(current.trim().to_string());
    }

    Ok(tokens)
}

fn parse_selector_step(part: &str) -> Result<SelectorStep> {
    let part = part.trim();
    if part.is_empty() {
        return Err(Error::UnsupportedSelector(part.into()));
    }

    let bytes = part.as_bytes();
    let mut i = 0usize;
    let mut step = SelectorStep::default();

    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                if step.universal {
                    return Err(Error::UnsupportedSelector(part.into()));
                }
                step.universal = true;
                i += 1;
            }
            b'#' => {
                i += 1;
                let Some((id, next)) = parse_selector_ident(part, i) else {
                    return Err(Error::UnsupportedSelector(part.into()));
                };
                if step.id.replace(id).is_some() {
                    return Err(Error::UnsupportedSelector(part.into()));
                }
                i = next;
            }
            b'.' => {
                i += 1;
                let Some((class_name, next)) = parse_selector_ident(part, i) else {
                    return Err(Error::UnsupportedSelector(part.into()));
                };
                step.classes.push(class_name);
                i = next;
            }
            b'[' => {
                let (attr, next) = parse_selector_attr_condition(part, i)?;
                step.attrs.push(attr);
                i = next;
            }
            b':' => {
                let Some((pseudo, next)) = parse_selector_pseudo(part, i) else {
                    return Err(Error::UnsupportedSelector(part.into()));
                };
                step.pseudo_classes.push(pseudo);
                i = next;
            }
            _ => {
                if step.tag.is_some()
                    || step.id.is_some()
                    || !step.classes.is_empty()
                    || step.universal
                {
                    return Err(Error::UnsupportedSelector(part.into()));
                }
                let Some((tag, next)) = parse_selector_ident(part, i) else {
                    return Err(Error::UnsupportedSelector(part.into()));
                };
                step.tag = Some(tag.to_ascii_lowercase());
                i = next;
            }
        }
    }

    Ok(step)
}

fn parse_selector_ident(part: &str, at: usize) -> Option<(String, usize)> {
    let bytes = part.as_bytes();
    let mut i = at;
    while i < bytes.len()
        && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-' || bytes[i] == b'_')
    {
        i += 1;
    }
    if i == at {
        return None;
    }
    part.get(at..i).map(|ident| (ident.to_string(), i))
}

fn parse_selector_attr_condition(part: &str, at: usize) -> Result<(SelectorAttrCondition, usize)> {
    let bytes = part.as_bytes();
    let mut i = at + 1;
    let start = i;
    while i < bytes.len() && bytes[i] != b']' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::UnsupportedSelector(part.into()));
    }

    let inner = part
        .get(start..i)
        .ok_or_else(|| Error::UnsupportedSelector(part.into()))?
        .trim();
    if inner.is_empty() {
        return Err(Error::UnsupportedSelector(part.into()));
    }

    let condition = match inner.split_once('=') {
        None => SelectorAttrCondition::Exists {
            key: inner.to_ascii_lowercase(),
        },
        Some((key, value)) => {
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(Error::UnsupportedSelector(part.into()));
            }
            let value = value
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string();
            SelectorAttrCondition::Eq { key, value }
        }
    };

    Ok((condition, i + 1))
}

fn parse_selector_pseudo(part: &str, at: usize) -> Option<(SelectorPseudoClass, usize)> {
    let (name, next) = parse_selector_ident(part, at + 1)?;
    match name.as_str() {
        "hover" => Some((SelectorPseudoClass::Hover, next)),
        _ => None,
    }
}

type Specificity = (u32, u32, u32);

fn chain_specificity(steps: &[SelectorPart]) -> Specificity {
    let mut spec = (0u32, 0u32, 0u32);
    for part in steps {
        let step = &part.step;
        if step.id.is_some() {
            spec.0 += 1;
        }
        spec.1 += (step.classes.len() + step.attrs.len() + step.pseudo_classes.len()) as u32;
        if step.tag.is_some() {
            spec.2 += 1;
        }
    }
    spec
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StyleDeclaration {
    name: String,
    value: String,
    important: bool,
}

#[derive(Debug, Clone)]
struct StyleRule {
    groups: Vec<Vec<SelectorPart>>,
    declarations: Vec<StyleDeclaration>,
}

fn parse_style_rules(css: &str) -> Result<Vec<StyleRule>> {
    let css = strip_css_comments(css)?;
    let bytes = css.as_bytes();
    let mut i = 0usize;
    let mut rules = Vec::new();

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let selector_start = i;
        while i < bytes.len() && bytes[i] != b'{' {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(Error::StyleParse("missing '{' in style rule".into()));
        }
        let selector = css
            .get(selector_start..i)
            .ok_or_else(|| Error::StyleParse("invalid selector text".into()))?
            .trim();
        if selector.is_empty() {
            return Err(Error::StyleParse("missing selector before '{'".into()));
        }
        let groups = parse_selector_groups(selector)?;
        i += 1;

        let body_start = i;
        while i < bytes.len() && bytes[i] != b'}' {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(Error::StyleParse("unclosed style rule".into()));
        }
        let body = css
            .get(body_start..i)
            .ok_or_else(|| Error::StyleParse("invalid rule body".into()))?;
        i += 1;

        let declarations = parse_rule_declarations(body)?;
        rules.push(StyleRule {
            groups,
            declarations,
        });
    }

    Ok(rules)
}

fn strip_css_comments(css: &str) -> Result<String> {
    let bytes = css.as_bytes();
    let mut out = String::with_capacity(css.len());
    let mut i = 0usize;

    while let Some(start) = find_subslice(bytes, i, b"/*") {
        out.push_str(
            css.get(i..start)
                .ok_or_else(|| Error::StyleParse("invalid style text".into()))?,
        );
        let end = find_subslice(bytes, start + 2, b"*/")
            .ok_or_else(|| Error::StyleParse("unclosed CSS comment".into()))?;
        i = end + 2;
    }
    out.push_str(
        css.get(i..)
            .ok_or_else(|| Error::StyleParse("invalid style text".into()))?,
    );
    Ok(out)
}

fn parse_rule_declarations(body: &str) -> Result<Vec<StyleDeclaration>> {
    let mut out = Vec::new();
    for decl in body.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let Some((name, value)) = decl.split_once(':') else {
            return Err(Error::StyleParse(format!(
                "missing ':' in declaration: {decl}"
            )));
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(Error::StyleParse(format!(
                "missing property name in declaration: {decl}"
            )));
        }
        let mut value = value.trim().to_string();
        let mut important = false;
        if let Some(stripped) = value.strip_suffix("!important") {
            important = true;
            value = stripped.trim_end().to_string();
        }
        if value.is_empty() {
            return Err(Error::StyleParse(format!(
                "missing value in declaration: {decl}"
            )));
        }
        out.push(StyleDeclaration {
            name,
            value,
            important,
        });
    }
    Ok(out)
}

fn default_display(tag: &str) -> &'static str {
    match tag {
        "head" | "style" | "script" | "meta" | "link" | "title" => "none",
        "a" | "span" | "em" | "strong" | "b" | "i" | "u" | "small" | "code" | "img" | "label" => {
            "inline"
        }
        "button" | "input" | "select" | "textarea" => "inline-block",
        "li" => "list-item",
        _ => "block",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Handler {
    DropdownTriggerNav,
}

#[derive(Debug, Clone)]
struct Listener {
    handler: Handler,
}

#[derive(Default)]
struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Listener>>>,
}

impl ListenerStore {
    fn add(&mut self, node_id: NodeId, event: String, listener: Listener) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event)
            .or_default()
            .push(listener);
    }

    fn get(&self, node_id: NodeId, event: &str) -> Vec<Listener> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }

    fn clear(&mut self) -> usize {
        let discarded = self.len();
        self.map.clear();
        discarded
    }

    fn len(&self) -> usize {
        self.map
            .values()
            .flat_map(|events| events.values())
            .map(Vec::len)
            .sum()
    }
}

#[derive(Debug, Clone)]
struct EventState {
    event_type: String,
    target: NodeId,
    current_target: NodeId,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            default_prevented: false,
            propagation_stopped: false,
        }
    }
}

struct DropdownNav;

impl DropdownNav {
    fn install_hover_style(dom: &mut Dom) -> NodeId {
        let head = dom.head();
        let style = dom.create_element(head, "style".to_string(), HashMap::new());
        dom.create_text(style, HOVER_STYLE_RULE.to_string());
        style
    }

    fn bind_triggers(dom: &mut Dom, listeners: &mut ListenerStore) -> Result<usize> {
        let triggers = dom.query_selector_all(TRIGGER_SELECTOR, None)?;
        for trigger in &triggers {
            dom.set_style_property(*trigger, "cursor", "pointer");
            listeners.add(
                *trigger,
                "click".to_string(),
                Listener {
                    handler: Handler::DropdownTriggerNav,
                },
            );
        }
        Ok(triggers.len())
    }
}

enum ReadyTask {
    BindTriggers,
}

pub struct Harness {
    dom: Dom,
    listeners: ListenerStore,
    ready_tasks: Vec<ReadyTask>,
    ready_fired: bool,
    hovered: Option<NodeId>,
    location: String,
    trace: bool,
    trace_events: bool,
    trace_nav: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Harness {
    pub fn from_html(html: &str) -> Result<Self> {
        let dom = parse_html(html)?;
        let mut harness = Self {
            dom,
            listeners: ListenerStore::default(),
            ready_tasks: Vec::new(),
            ready_fired: false,
            hovered: None,
            location: START_LOCATION.to_string(),
            trace: false,
            trace_events: true,
            trace_nav: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        };

        harness.attach_behavior();
        harness.fire_document_ready()?;
        harness.collect_style_rules()?;

        Ok(harness)
    }

    pub fn attach_behavior(&mut self) {
        DropdownNav::install_hover_style(&mut self.dom);
        if !self.ready_fired {
            self.ready_tasks.push(ReadyTask::BindTriggers);
        }
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled;
    }

    pub fn set_trace_nav(&mut self, enabled: bool) {
        self.trace_nav = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Config(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;

        let event = self.dispatch_event(target, "click")?;
        if event.default_prevented {
            return Ok(());
        }

        if let Some(href) = self.resolve_anchor_href(target) {
            self.navigate(&href);
        }

        Ok(())
    }

    pub fn hover(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.hovered = Some(target);
        let label = self.trace_node_label(target);
        self.trace_nav_line(format!("[hover] target={label}"));
        Ok(())
    }

    pub fn clear_hover(&mut self) {
        if self.hovered.take().is_some() {
            self.trace_nav_line("[hover] cleared".to_string());
        }
    }

    pub fn dispatch(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dispatch_event(target, event)?;
        Ok(())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn style_texts(&self) -> Vec<String> {
        self.dom
            .elements_by_tag("style")
            .into_iter()
            .map(|node| self.dom.text_content(node))
            .collect()
    }

    pub fn cursor(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self
            .dom
            .style_property(target, "cursor")
            .unwrap_or_else(|| "auto".to_string()))
    }

    pub fn computed_display(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.computed_display_of(target)
    }

    pub fn assert_location(&self, expected: &str) -> Result<()> {
        if self.location != expected {
            return Err(Error::AssertionFailed {
                selector: "location".to_string(),
                expected: expected.to_string(),
                actual: self.location.clone(),
                dom_snippet: String::new(),
            });
        }
        Ok(())
    }

    pub fn assert_cursor(&self, selector: &str, expected: &str) -> Result<()> {
        let actual = self.cursor(selector)?;
        if actual != expected {
            let target = self.select_one(selector)?;
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_computed_display(&self, selector: &str, expected: &str) -> Result<()> {
        let actual = self.computed_display(selector)?;
        if actual != expected {
            let target = self.select_one(selector)?;
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector, self.hovered)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    fn fire_document_ready(&mut self) -> Result<()> {
        self.ready_fired = true;
        let tasks = std::mem::take(&mut self.ready_tasks);
        for task in tasks {
            match task {
                ReadyTask::BindTriggers => {
                    let bound = stacker::grow(32 * 1024 * 1024, || {
                        DropdownNav::bind_triggers(&mut self.dom, &mut self.listeners)
                    })?;
                    self.trace_nav_line(format!("[ready] bound_triggers={bound}"));
                }
            }
        }
        Ok(())
    }

    fn collect_style_rules(&self) -> Result<Vec<StyleRule>> {
        let mut rules = Vec::new();
        for node in self.dom.elements_by_tag("style") {
            let css = self.dom.text_content(node);
            rules.extend(parse_style_rules(&css)?);
        }
        Ok(rules)
    }

    fn computed_display_of(&self, node_id: NodeId) -> Result<String> {
        let rules = self.collect_style_rules()?;

        let mut important: Option<(Specificity, usize, String)> = None;
        let mut normal: Option<(Specificity, usize, String)> = None;

        for (order, rule) in rules.iter().enumerate() {
            let mut best: Option<Specificity> = None;
            for group in &rule.groups {
                if self.dom.matches_selector_chain(node_id, group, self.hovered) {
                    let spec = chain_specificity(group);
                    if best.is_none_or(|current| spec > current) {
                        best = Some(spec);
                    }
                }
            }
            let Some(spec) = best else {
                continue;
            };

            for decl in &rule.declarations {
                if decl.name != "display" {
                    continue;
                }
                let slot = if decl.important {
                    &mut important
                } else {
                    &mut normal
                };
                if slot
                    .as_ref()
                    .is_none_or(|(s, o, _)| (spec, order) >= (*s, *o))
                {
                    *slot = Some((spec, order, decl.value.clone()));
                }
            }
        }

        if let Some((_, _, value)) = important {
            return Ok(value);
        }
        if let Some(value) = self.dom.style_property(node_id, "display") {
            return Ok(value);
        }
        if let Some((_, _, value)) = normal {
            return Ok(value);
        }
        let tag = self.dom.tag_name(node_id).unwrap_or("");
        Ok(default_display(tag).to_string())
    }

    fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> Result<EventState> {
        let mut event = EventState::new(event_type, target);

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.dom.parent(node);
        }

        // Target first, then bubble toward the document root.
        for node in &path {
            event.current_target = *node;
            self.invoke_listeners(*node, &mut event)?;
            if event.propagation_stopped {
                self.trace_event_done(&event, "propagation_stopped");
                return Ok(event);
            }
        }

        self.trace_event_done(&event, "completed");
        Ok(event)
    }

    fn invoke_listeners(&mut self, node_id: NodeId, event: &mut EventState) -> Result<()> {
        let listeners = self.listeners.get(node_id, &event.event_type);
        for listener in listeners {
            if self.trace {
                let target_label = self.trace_node_label(event.target);
                let current_label = self.trace_node_label(event.current_target);
                self.trace_event_line(format!(
                    "[event] {} target={} current={} default_prevented={}",
                    event.event_type, target_label, current_label, event.default_prevented
                ));
            }
            self.run_handler(&listener.handler, event)?;
        }
        Ok(())
    }

    fn run_handler(&mut self, handler: &Handler, event: &mut EventState) -> Result<()> {
        match handler {
            Handler::DropdownTriggerNav => {
                let element = event.current_target;
                let is_anchor = self
                    .dom
                    .tag_name(element)
                    .map(|tag| tag.eq_ignore_ascii_case("a"))
                    .unwrap_or(false);
                let href = self.dom.attr(element, "href").unwrap_or_default();

                // A real link keeps its native navigation.
                if is_anchor && !href.is_empty() {
                    return Ok(());
                }

                event.default_prevented = true;
                event.propagation_stopped = true;
                self.navigate(FALLBACK_NAV_HREF);
            }
        }
        Ok(())
    }

    fn resolve_anchor_href(&self, target: NodeId) -> Option<String> {
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            if self
                .dom
                .tag_name(node)
                .map(|tag| tag.eq_ignore_ascii_case("a"))
                .unwrap_or(false)
            {
                let href = self.dom.attr(node, "href").unwrap_or_default();
                if !href.is_empty() {
                    return Some(href);
                }
            }
            cursor = self.dom.parent(node);
        }
        None
    }

    fn navigate(&mut self, href: &str) {
        self.location = href.to_string();
        self.hovered = None;
        let discarded = self.listeners.clear();
        self.trace_nav_line(format!(
            "[nav] location={href} discarded_listeners={discarded}"
        ));
    }

    fn trace_node_label(&self, node_id: NodeId) -> String {
        let Some(tag) = self.dom.tag_name(node_id) else {
            return "#document".to_string();
        };
        match self.dom.attr(node_id, "id") {
            Some(id) if !id.is_empty() => format!("{tag}#{id}"),
            _ => tag.to_string(),
        }
    }

    fn trace_event_done(&mut self, event: &EventState, outcome: &str) {
        let target_label = self.trace_node_label(event.target);
        let current_label = self.trace_node_label(event.current_target);
        self.trace_event_line(format!(
            "[event] done {} target={} current={} outcome={} default_prevented={} propagation_stopped={}",
            event.event_type,
            target_label,
            current_label,
            outcome,
            event.default_prevented,
            event.propagation_stopped
        ));
    }

    fn trace_event_line(&mut self, line: String) {
        if self.trace && self.trace_events {
            self.trace_line(line);
        }
    }

    fn trace_nav_line(&mut self, line: String) {
        if self.trace && self.trace_nav {
            self.trace_line(line);
        }
    }

    fn trace_line(&mut self, line: String) {
        if self.trace {
            if self.trace_to_stderr {
                eprintln!("{line}");
            }
            self.trace_logs.push(line);
            while self.trace_logs.len() > self.trace_log_limit {
                self.trace_logs.remove(0);
            }
        }
    }
}

fn parse_html(html: &str) -> Result<Dom> {
    let mut dom = Dom::new();

    let mut stack = vec![dom.root];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            if let Some(end) = find_subslice(bytes, i + 4, b"-->") {
                i = end + 3;
            } else {
                return Err(Error::HtmlParse("unclosed HTML comment".into()));
            }
            continue;
        }

        if starts_with_at(bytes, i, b"<!") {
            // Doctype and other markup declarations carry no DOM content.
            while i < bytes.len() && bytes[i] != b'>' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(Error::HtmlParse("unclosed markup declaration".into()));
            }
            i += 1;
            continue;
        }

        if bytes[i] == b'<' {
            if starts_with_at(bytes, i, b"</") {
                let (tag, next) = parse_end_tag(html, i)?;
                i = next;

                while stack.len() > 1 {
                    let top = *stack
                        .last()
                        .ok_or_else(|| Error::HtmlParse("invalid stack state".into()))?;
                    let top_tag = dom.tag_name(top).unwrap_or("");
                    stack.pop();
                    if top_tag.eq_ignore_ascii_case(&tag) {
                        break;
                    }
                }
                continue;
            }

            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;

            let parent = *stack
                .last()
                .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
            let node = dom.create_element(parent, tag.clone(), attrs);

            if is_raw_text_tag(&tag) {
                let close = find_case_insensitive_end_tag(bytes, i, tag.as_bytes())
                    .ok_or_else(|| Error::HtmlParse(format!("unclosed <{tag}>")))?;
                if let Some(raw) = html.get(i..close) {
                    if !raw.is_empty() {
                        dom.create_text(node, raw.to_string());
                    }
                }
                i = close;
                let (_, after_end) = parse_end_tag(html, i)?;
                i = after_end;
                continue;
            }

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }

        if let Some(text) = html.get(text_start..i) {
            if !text.is_empty() {
                let parent = *stack
                    .last()
                    .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
                dom.create_text(parent, text.to_string());
            }
        }
    }

    Ok(dom)
}

fn parse_start_tag(
    html: &str,
    at: usize,
) -> Result<(String, HashMap<String, String>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return Err(Error::HtmlParse("expected '<'".into()));
    }
    i += 1;

    skip_ws(bytes, &mut i);
    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();

    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs = HashMap::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed start tag".into()));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'>' {
            self_closing = true;
            i += 2;
            break;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }

        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();

        if name.is_empty() {
            return Err(Error::HtmlParse("invalid attribute name".into()));
        }

        skip_ws(bytes, &mut i);

        let value = if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            "true".to_string()
        };

        attrs.insert(name, value);
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;

    if !(bytes.get(i) == Some(&b'<') && bytes.get(i + 1) == Some(&b'/')) {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag".into()))?
        .to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::HtmlParse("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if *i >= bytes.len() {
        return Err(Error::HtmlParse("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed quoted attribute value".into()));
        }
        let value = html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
            .to_string();
        *i += 1;
        return Ok(value);
    }

    let start = *i;
    while *i < bytes.len()
        && !bytes[*i].is_ascii_whitespace()
        && bytes[*i] != b'>'
        && !(bytes[*i] == b'/' && *i + 1 < bytes.len() && bytes[*i + 1] == b'>')
    {
        *i += 1;
    }

    let value = html
        .get(start..*i)
        .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
        .to_string();
    Ok(value)
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

fn is_attr_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "style" | "script")
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    if at + needle.len() > bytes.len() {
        return false;
    }
    &bytes[at..at + needle.len()] == needle
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from > bytes.len() {
        return None;
    }

    let mut i = from;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find_case_insensitive_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut needle = Vec::new();
    needle.extend_from_slice(b"</");
    needle.extend(tag.iter().map(|b| b.to_ascii_lowercase()));

    let mut i = from;
    while i + needle.len() <= bytes.len() {
        if bytes[i] == b'<' && bytes.get(i + 1) == Some(&b'/') {
            let mut matched = true;
            for j in 0..needle.len() {
                let a = bytes[i + j].to_ascii_lowercase();
                let b = needle[j];
                if a != b {
                    matched = false;
                    break;
                }
            }
            if matched {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}
