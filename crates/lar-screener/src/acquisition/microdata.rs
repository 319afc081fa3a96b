//! `AggregateRating` from microdata (`itemtype`/`itemprop`) and RDFa
//! (`typeof`/`property`) attributes.

use scraper::{ElementRef, Html, Selector};

use super::rating::{RatingSignal, RatingSource};

/// Rating from a microdata `AggregateRating` node, tagged [`RatingSource::JsMicrodata`].
pub fn microdata_rating(html: &str) -> Option<RatingSignal> {
    let document = Html::parse_document(html);
    let scopes = Selector::parse("[itemtype], [itemprop]").expect("valid selector");
    let props = Selector::parse("[itemprop]").expect("valid selector");

    let found = document
        .select(&scopes)
        .filter(|el| {
            let v = el.value();
            v.attr("itemtype").map(names_aggregate_rating).unwrap_or(false)
                || v.attr("itemprop")
                    .map(|p| has_token(p, "aggregateRating"))
                    .unwrap_or(false)
        })
        .find_map(|node| {
            rating_in(node, &props, "itemprop", RatingSource::JsMicrodata)
        });
    found
}

/// Rating from an RDFa `AggregateRating` node, tagged [`RatingSource::JsRdfa`].
pub fn rdfa_rating(html: &str) -> Option<RatingSignal> {
    let document = Html::parse_document(html);
    let scopes = Selector::parse("[typeof]").expect("valid selector");
    let props = Selector::parse("[property]").expect("valid selector");

    let found = document
        .select(&scopes)
        .filter(|el| {
            el.value()
                .attr("typeof")
                .map(names_aggregate_rating)
                .unwrap_or(false)
        })
        .find_map(|node| rating_in(node, &props, "property", RatingSource::JsRdfa));
    found
}

fn rating_in(
    node: ElementRef<'_>,
    props: &Selector,
    attr: &str,
    source: RatingSource,
) -> Option<RatingSignal> {
    let mut value = None;
    let mut count = None;
    for prop in node.select(props) {
        let Some(names) = prop.value().attr(attr) else {
            continue;
        };
        if value.is_none() && has_token(names, "ratingValue") {
            value = property_value(prop);
        } else if count.is_none()
            && (has_token(names, "ratingCount") || has_token(names, "reviewCount"))
        {
            count = property_value(prop);
        }
    }
    RatingSignal::new(&value?, count.as_deref(), source)
}

/// `content` wins over `value` wins over text, as in microdata and RDFa.
fn property_value(el: ElementRef<'_>) -> Option<String> {
    let attr = el
        .value()
        .attr("content")
        .or_else(|| el.value().attr("value"));
    let text = match attr {
        Some(a) => a.trim().to_string(),
        None => el.text().collect::<String>().trim().to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Whether a space-separated type list names `AggregateRating` in any
/// vocabulary form (`https://schema.org/AggregateRating`, `schema:AggregateRating`).
fn names_aggregate_rating(types: &str) -> bool {
    types.split_whitespace().any(|t| {
        t.trim_end_matches('/')
            .rsplit(['/', ':', '#'])
            .next()
            .map(|local| local == "AggregateRating")
            .unwrap_or(false)
    })
}

fn has_token(names: &str, wanted: &str) -> bool {
    names.split_whitespace().any(|n| {
        n.rsplit(['/', ':', '#'])
            .next()
            .map(|local| local == wanted)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_microdata_content_attributes() {
        let html = r#"
        <div itemscope itemtype="https://schema.org/Product">
          <span itemprop="name">Heater</span>
          <div itemprop="aggregateRating" itemscope itemtype="https://schema.org/AggregateRating">
            <meta itemprop="ratingValue" content="4,3">
            <span itemprop="reviewCount">1 017</span>
          </div>
        </div>"#;
        let signal = microdata_rating(html).unwrap();
        assert_eq!(signal.value, "4.3");
        assert_eq!(signal.count, "1017");
        assert_eq!(signal.source, RatingSource::JsMicrodata);
    }

    #[test]
    fn test_microdata_without_itemtype() {
        let html = r#"<div itemprop="aggregateRating" itemscope>
            <span itemprop="ratingValue">3.8</span></div>"#;
        let signal = microdata_rating(html).unwrap();
        assert_eq!(signal.value, "3.8");
        assert_eq!(signal.count, "");
    }

    #[test]
    fn test_rdfa_prefixed_properties() {
        let html = r#"
        <div vocab="https://schema.org/" typeof="schema:AggregateRating">
          <span property="schema:ratingValue">4.9</span>
          <span property="ratingCount" content="61"></span>
        </div>"#;
        let signal = rdfa_rating(html).unwrap();
        assert_eq!(signal.value, "4.9");
        assert_eq!(signal.count, "61");
        assert_eq!(signal.source, RatingSource::JsRdfa);
        assert!(microdata_rating(html).is_none());
    }

    #[test]
    fn test_non_numeric_value_is_ignored() {
        let html = r#"<div itemscope itemtype="http://schema.org/AggregateRating">
            <span itemprop="ratingValue">five stars</span></div>"#;
        assert!(microdata_rating(html).is_none());
    }

    #[test]
    fn test_type_name_matching() {
        assert!(names_aggregate_rating("http://schema.org/AggregateRating"));
        assert!(names_aggregate_rating("schema:AggregateRating"));
        assert!(names_aggregate_rating("Thing AggregateRating"));
        assert!(!names_aggregate_rating("https://schema.org/Rating"));
    }
}
