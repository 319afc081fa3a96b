//! Parse JSON-LD graphs from raw HTML into typed items.
//!
//! Every `<script type="application/ld+json">` block is parsed (leniently),
//! flattened through top-level arrays and `@graph` containers, and turned
//! into [`StructuredItem`]s. Property values keep their linked-data shape as
//! an [`LdValue`], so "this may be a reference to another node" is handled in
//! exactly one place: [`PageGraph::resolve`].

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Unit substrings that mark an `additionalProperty` value as a real spec.
///
/// Matched case-sensitively with the leading space, so `"2000 W"` counts and
/// `"Wood"` does not.
pub const SPEC_UNITS: [&str; 10] = [
    " W", " kW", " L", " l", " mm", " cm", " dB", " m³/h", " lm", " kg",
];

/// Keys carrying merchant policy evidence directly on an item.
pub const POLICY_KEYS: [&str; 2] = ["hasMerchantReturnPolicy", "hasWarrantyPromise"];

/// The schema.org types the audit cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    Product,
    Offer,
    ProductGroup,
    Service,
    AggregateRating,
    Organization,
    MerchantReturnPolicy,
    WarrantyPromise,
    Other,
}

impl SchemaType {
    /// Map a declared `@type` to a bucket. Accepts `schema:` and
    /// `https://schema.org/` prefixed forms.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        let local = name
            .strip_prefix("https://schema.org/")
            .or_else(|| name.strip_prefix("http://schema.org/"))
            .or_else(|| name.strip_prefix("schema:"))
            .unwrap_or(name);
        match local {
            "Product" => Self::Product,
            "Offer" | "AggregateOffer" => Self::Offer,
            "ProductGroup" => Self::ProductGroup,
            "Service" => Self::Service,
            "AggregateRating" => Self::AggregateRating,
            "Organization" | "OnlineStore" | "OnlineBusiness" => Self::Organization,
            "MerchantReturnPolicy" => Self::MerchantReturnPolicy,
            "WarrantyPromise" => Self::WarrantyPromise,
            _ => Self::Other,
        }
    }
}

/// A linked-data property value.
#[derive(Debug, Clone, PartialEq)]
pub enum LdValue {
    /// A scalar: string, number, bool or null. A string may still name an
    /// `@id` elsewhere in the page.
    Literal(Value),
    /// `{"@id": "..."}` with no other properties.
    Reference(String),
    /// An inline node.
    Object(Box<StructuredItem>),
    List(Vec<LdValue>),
}

impl LdValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Array(values) => Self::List(values.iter().map(Self::from_json).collect()),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(Value::String(id)) = map.get("@id") {
                        return Self::Reference(id.clone());
                    }
                }
                Self::Object(Box::new(StructuredItem::from_map(map)))
            }
            other => Self::Literal(other.clone()),
        }
    }

    /// Text of a literal string or number; `None` for blanks and non-scalars.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Literal(Value::String(s)) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Self::Literal(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&StructuredItem> {
        match self {
            Self::Object(item) => Some(item),
            _ => None,
        }
    }

    /// Whether the value carries anything: non-blank text, a non-zero number,
    /// `true`, a reference, an object, or a non-empty list.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Literal(Value::String(s)) => !s.trim().is_empty(),
            Self::Literal(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Self::Literal(Value::Bool(b)) => *b,
            Self::Literal(_) => false,
            Self::Reference(_) | Self::Object(_) => true,
            Self::List(values) => !values.is_empty(),
        }
    }

    /// Inline objects held by this value (a single object or list members).
    pub fn objects(&self) -> Vec<&StructuredItem> {
        match self {
            Self::Object(item) => vec![item.as_ref()],
            Self::List(values) => values.iter().flat_map(|v| v.objects()).collect(),
            _ => Vec::new(),
        }
    }
}

/// One JSON-LD node.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredItem {
    /// First string-typed entry of `@type`.
    pub type_name: Option<String>,
    pub schema_type: SchemaType,
    pub id: Option<String>,
    pub properties: BTreeMap<String, LdValue>,
}

impl StructuredItem {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let type_name = match map.get("@type") {
            Some(Value::String(t)) => Some(t.clone()),
            Some(Value::Array(types)) => types
                .iter()
                .find_map(|t| t.as_str())
                .map(|t| t.to_string()),
            _ => None,
        };
        let schema_type = type_name
            .as_deref()
            .map(SchemaType::from_name)
            .unwrap_or(SchemaType::Other);
        let id = map
            .get("@id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let properties = map
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "@type" | "@id" | "@context"))
            .map(|(k, v)| (k.clone(), LdValue::from_json(v)))
            .collect();

        Self {
            type_name,
            schema_type,
            id,
            properties,
        }
    }

    pub fn get(&self, key: &str) -> Option<&LdValue> {
        self.properties.get(key)
    }

    /// Whether the key is present at all, regardless of its value.
    pub fn has(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Whether the key is present with a truthy value.
    pub fn has_value(&self, key: &str) -> bool {
        self.get(key).map(LdValue::is_truthy).unwrap_or(false)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(LdValue::as_text)
    }
}

/// All JSON-LD nodes of one page plus an `@id` index.
#[derive(Debug, Clone, Default)]
pub struct PageGraph {
    pub items: Vec<StructuredItem>,
    index: HashMap<String, usize>,
    base: Option<url::Url>,
}

/// Items grouped by schema type, borrowing from a [`PageGraph`].
#[derive(Debug, Default)]
pub struct SchemaBuckets<'a> {
    pub products: Vec<&'a StructuredItem>,
    pub offers: Vec<&'a StructuredItem>,
    pub product_groups: Vec<&'a StructuredItem>,
    pub services: Vec<&'a StructuredItem>,
    pub aggregate_ratings: Vec<&'a StructuredItem>,
    pub organizations: Vec<&'a StructuredItem>,
    /// `MerchantReturnPolicy` and `WarrantyPromise` nodes.
    pub policies: Vec<&'a StructuredItem>,
}

impl PageGraph {
    /// Parse every JSON-LD block in `html`. Invalid blocks are skipped.
    pub fn from_html(html: &str, base_url: &str) -> Self {
        Self::from_values(&extract_jsonld_blocks(html), base_url)
    }

    pub fn from_values(values: &[Value], base_url: &str) -> Self {
        let mut items = Vec::new();
        for value in values {
            flatten_into(value, &mut items);
        }

        let base = url::Url::parse(base_url).ok();
        let mut index = HashMap::new();
        for (i, item) in items.iter().enumerate() {
            if let Some(id) = &item.id {
                index.entry(id.clone()).or_insert(i);
                if let Some(absolute) = base.as_ref().and_then(|b| b.join(id).ok()) {
                    index.entry(absolute.to_string()).or_insert(i);
                }
            }
        }

        Self { items, index, base }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Find the node declaring `id`, also trying `id` resolved against the base URL.
    pub fn lookup(&self, id: &str) -> Option<&StructuredItem> {
        if let Some(&i) = self.index.get(id) {
            return self.items.get(i);
        }
        let absolute = self.base.as_ref()?.join(id).ok()?;
        self.index
            .get(absolute.as_str())
            .and_then(|&i| self.items.get(i))
    }

    /// Resolve a property value into concrete nodes.
    ///
    /// Literals resolve only when they name a known `@id`; references resolve
    /// through the index; inline objects resolve to the indexed node sharing
    /// their `@id`, else to themselves; lists resolve member by member.
    /// Resolution is a single hop: properties of resolved nodes are not
    /// followed, so self- and cyclic references terminate.
    pub fn resolve<'a>(&'a self, value: &'a LdValue) -> Vec<&'a StructuredItem> {
        let mut out = Vec::new();
        self.resolve_into(value, &mut out);
        out
    }

    fn resolve_into<'a>(&'a self, value: &'a LdValue, out: &mut Vec<&'a StructuredItem>) {
        match value {
            LdValue::Literal(Value::String(s)) => {
                if let Some(item) = self.lookup(s) {
                    out.push(item);
                }
            }
            LdValue::Literal(_) => {}
            LdValue::Reference(id) => {
                if let Some(item) = self.lookup(id) {
                    out.push(item);
                }
            }
            LdValue::Object(item) => {
                let indexed = item.id.as_deref().and_then(|id| self.lookup(id));
                out.push(indexed.unwrap_or(item.as_ref()));
            }
            LdValue::List(values) => {
                for v in values {
                    self.resolve_into(v, out);
                }
            }
        }
    }

    /// Resolve the named property of `item`; empty when absent.
    pub fn resolve_property<'a>(&'a self, item: &'a StructuredItem, key: &str) -> Vec<&'a StructuredItem> {
        item.get(key).map(|v| self.resolve(v)).unwrap_or_default()
    }

    pub fn classify(&self) -> SchemaBuckets<'_> {
        let mut buckets = SchemaBuckets::default();
        for item in &self.items {
            match item.schema_type {
                SchemaType::Product => buckets.products.push(item),
                SchemaType::Offer => buckets.offers.push(item),
                SchemaType::ProductGroup => buckets.product_groups.push(item),
                SchemaType::Service => buckets.services.push(item),
                SchemaType::AggregateRating => buckets.aggregate_ratings.push(item),
                SchemaType::Organization => buckets.organizations.push(item),
                SchemaType::MerchantReturnPolicy | SchemaType::WarrantyPromise => {
                    buckets.policies.push(item)
                }
                SchemaType::Other => {}
            }
        }
        buckets
    }
}

fn flatten_into(value: &Value, items: &mut Vec<StructuredItem>) {
    match value {
        Value::Array(values) => {
            for v in values {
                flatten_into(v, items);
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                if map.contains_key("@type") {
                    items.push(StructuredItem::from_map(map));
                }
                flatten_into(graph, items);
            } else {
                items.push(StructuredItem::from_map(map));
            }
        }
        _ => {}
    }
}

// ── Raw HTML scanning ───────────────────────────────────────────────────────

fn script_selector() -> Selector {
    Selector::parse("script").expect("valid selector")
}

fn is_jsonld_type(type_attr: Option<&str>) -> bool {
    type_attr
        .map(|t| t.trim().eq_ignore_ascii_case("application/ld+json"))
        .unwrap_or(false)
}

/// Whether the HTML contains a JSON-LD script tag at all, parseable or not.
pub fn has_server_rendered_jsonld(html: &str) -> bool {
    let document = Html::parse_document(html);
    let sel = script_selector();
    let found = document
        .select(&sel)
        .any(|el| is_jsonld_type(el.value().attr("type")));
    found
}

/// Parse every JSON-LD block. Blocks that fail even lenient parsing are dropped.
pub fn extract_jsonld_blocks(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let sel = script_selector();
    let mut blocks = Vec::new();
    for element in document.select(&sel) {
        if !is_jsonld_type(element.value().attr("type")) {
            continue;
        }
        let text: String = element.text().collect();
        match parse_lenient(&text) {
            Some(value) => blocks.push(value),
            None => tracing::debug!("skipping unparseable JSON-LD block ({} bytes)", text.len()),
        }
    }
    blocks
}

/// Parse JSON, retrying once after stripping comment/CDATA wrappers,
/// trailing semicolons and raw control characters.
pub fn parse_lenient(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    serde_json::from_str(&clean_block(trimmed)).ok()
}

fn clean_block(text: &str) -> String {
    const PREFIXES: [&str; 3] = ["<!--", "//<![CDATA[", "<![CDATA["];
    const SUFFIXES: [&str; 3] = ["-->", "//]]>", "]]>"];

    let mut s = text.trim();
    loop {
        let before = s.len();
        for p in PREFIXES {
            if let Some(rest) = s.strip_prefix(p) {
                s = rest.trim_start();
            }
        }
        for suffix in SUFFIXES {
            if let Some(rest) = s.strip_suffix(suffix) {
                s = rest.trim_end();
            }
        }
        s = s.trim_end_matches(';').trim();
        if s.len() == before {
            break;
        }
    }

    s.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

// ── Item helpers ────────────────────────────────────────────────────────────

/// Whether an item carries merchant-policy evidence.
///
/// True when the item has `hasMerchantReturnPolicy`/`hasWarrantyPromise`, or
/// when any resolved offer carries `shippingDetails` or those policy keys.
pub fn has_policy_evidence(graph: &PageGraph, item: &StructuredItem) -> bool {
    if POLICY_KEYS.iter().any(|k| item.has(k)) {
        return true;
    }
    graph.resolve_property(item, "offers").iter().any(|offer| {
        offer.has("shippingDetails") || POLICY_KEYS.iter().any(|k| offer.has(k))
    })
}

/// Identifier completeness of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum IdentifierTier {
    #[default]
    None,
    BrandMpn,
    Gtin,
}

/// Flattened identifiers of a product node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductIdentifiers {
    pub sku: Option<String>,
    pub mpn: Option<String>,
    pub brand: Option<String>,
    pub gtin: Option<String>,
    pub gtin8: Option<String>,
    pub gtin12: Option<String>,
    pub gtin13: Option<String>,
    pub gtin14: Option<String>,
}

impl ProductIdentifiers {
    pub fn from_item(item: &StructuredItem) -> Self {
        Self {
            sku: item.text("sku"),
            mpn: item.text("mpn"),
            brand: item.get("brand").and_then(brand_name),
            gtin: item.text("gtin"),
            gtin8: item.text("gtin8"),
            gtin12: item.text("gtin12"),
            gtin13: item.text("gtin13"),
            gtin14: item.text("gtin14"),
        }
    }

    pub fn has_gtin(&self) -> bool {
        [&self.gtin, &self.gtin8, &self.gtin12, &self.gtin13, &self.gtin14]
            .iter()
            .any(|g| g.is_some())
    }

    pub fn tier(&self) -> IdentifierTier {
        if self.has_gtin() {
            IdentifierTier::Gtin
        } else if self.brand.is_some() && self.mpn.is_some() {
            IdentifierTier::BrandMpn
        } else {
            IdentifierTier::None
        }
    }
}

/// Brand as a plain name: an object's `name`, a string, or the first usable list entry.
fn brand_name(value: &LdValue) -> Option<String> {
    match value {
        LdValue::Object(item) => item.text("name"),
        LdValue::List(values) => values.iter().find_map(brand_name),
        other => other.as_text(),
    }
}

/// Whether any `additionalProperty` value names a unit from [`SPEC_UNITS`].
pub fn has_units(additional_properties: Option<&LdValue>) -> bool {
    let Some(props) = additional_properties else {
        return false;
    };
    props.objects().iter().any(|prop| match prop.get("value") {
        Some(LdValue::Literal(Value::String(v))) => SPEC_UNITS.iter().any(|u| v.contains(u)),
        _ => false,
    })
}

/// Whether any `additionalProperty` value is a range (`minValue`/`maxValue`).
pub fn has_spec_ranges(item: &StructuredItem) -> bool {
    let Some(props) = item.get("additionalProperty") else {
        return false;
    };
    props.objects().iter().any(|prop| {
        prop.get("value")
            .and_then(LdValue::as_object)
            .map(|v| v.has("minValue") || v.has("maxValue"))
            .unwrap_or(false)
    })
}
