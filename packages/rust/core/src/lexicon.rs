//! Aroma cluster lexicon and keyword-scan enrichment.
//!
//! Profiles normally arrive with an `aroma` map from the summarizer. When
//! they don't, [`derive_cluster_map`] rebuilds one by scanning the nose and
//! palate text for the descriptors below.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use winelens_shared::ClusterMap;

/// Aroma cluster → descriptors, in prompt order.
pub const AROMA_LEXICONS: &[(&str, &[&str])] = &[
    ("Floral", &["acacia", "honeysuckle", "chamomile", "elderflower", "geranium", "blossom", "rose", "violet", "jasmine"]),
    ("Green fruit", &["apple", "pear", "pear drop", "quince", "gooseberry", "grape"]),
    ("Citrus fruit", &["grapefruit", "lemon", "lime", "orange", "orange peel", "lemon peel", "yuzu", "bergamot"]),
    ("Stone fruit", &["peach", "apricot", "nectarine"]),
    ("Tropical fruit", &["banana", "lychee", "pineapple", "mango", "passion fruit", "melon", "papaya", "guava"]),
    ("Red fruit", &["redcurrant", "strawberry", "raspberry", "red cherry", "cranberry", "red plum", "morello cherry"]),
    ("Black fruit", &["blackcurrant", "cassis", "blackberry", "bramble", "blueberry", "black cherry", "black plum"]),
    ("Dried/cooked fruit", &["fig", "prune", "raisin", "sultana", "kirsch", "jamminess", "baked fruits", "stewed fruits", "preserved fruit"]),
    ("Herbaceous", &["green bell pepper", "capsicum", "grass", "tomato leaf", "asparagus", "blackcurrant leaf"]),
    ("Herbal", &["eucalyptus", "mint", "medicinal", "lavender", "fennel", "dill", "dried herbs", "thyme", "oregano"]),
    ("Spice", &["black pepper", "white pepper", "liquorice", "cinnamon"]),
    ("Other aroma", &["flint", "wet stones", "wet wool", "candy", "graphite"]),
    ("Yeast", &["biscuit", "graham cracker", "bread", "toast", "pastry", "brioche", "bread dough", "cheese", "yogurt", "acetaldehyde"]),
    ("Malolactic", &["butter", "cheese", "cream"]),
    ("Oak", &["vanilla", "clove", "nutmeg", "coconut", "butterscotch", "toast", "cedar", "charred wood", "smoke", "chocolate", "coffee", "resinous"]),
    ("Oxidation", &["almond", "marzipan", "hazelnut", "walnut", "chocolate", "coffee", "toffee", "caramel"]),
    ("Fruit development (White)", &["dried fruit", "dried apricot", "raisin", "orange marmalade", "marmalade", "dried apple", "dried banana"]),
    ("Fruit development (Red)", &["fig", "prune", "raisin", "tar", "dried fruit", "dried blackberry", "dried cranberry", "cooked fruit", "cooked blackberry", "cooked plum", "cooked cherry"]),
    ("Bottle age (White)", &["petrol", "gasoline", "kerosene", "cinnamon", "ginger", "nutmeg", "toast", "nutty", "mushroom", "hay", "honey"]),
    ("Bottle age (Red)", &["forest floor", "mushroom", "game", "tobacco", "vegetal", "wet leaves", "savoury", "meat", "leather", "earth", "farmyard"]),
];

/// Cluster names in lexicon order.
pub fn cluster_names() -> impl Iterator<Item = &'static str> {
    AROMA_LEXICONS.iter().map(|(name, _)| *name)
}

/// One compiled whole-word pattern per descriptor.
static DESCRIPTOR_PATTERNS: LazyLock<Vec<(&'static str, &'static str, Regex)>> =
    LazyLock::new(|| {
        AROMA_LEXICONS
            .iter()
            .flat_map(|(cluster, descriptors)| {
                descriptors.iter().map(move |d| {
                    let pattern = format!(r"(?i)\b{}\b", regex::escape(d));
                    (*cluster, *d, Regex::new(&pattern).expect("valid regex"))
                })
            })
            .collect()
    });

/// Scan `text` for lexicon descriptors and group the hits by cluster.
///
/// Matching is case-insensitive on word boundaries, so `grape` does not
/// match inside `grapefruit`. A descriptor listed under several clusters
/// counts for each of them. Clusters without hits are omitted.
pub fn derive_cluster_map(text: &str) -> ClusterMap {
    let mut clusters = ClusterMap::new();

    for (cluster, descriptor, pattern) in DESCRIPTOR_PATTERNS.iter() {
        if pattern.is_match(text) {
            clusters
                .entry((*cluster).to_string())
                .or_default()
                .push((*descriptor).to_string());
        }
    }

    clusters
}

/// Distinct descriptors across all clusters.
pub fn distinct_descriptors(clusters: &ClusterMap) -> BTreeSet<&str> {
    clusters.values().flatten().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicon_has_twenty_clusters() {
        assert_eq!(AROMA_LEXICONS.len(), 20);
        assert_eq!(cluster_names().next(), Some("Floral"));
    }

    #[test]
    fn derives_clusters_from_text() {
        let map = derive_cluster_map("Pronounced Black Cherry, cedar and violet with a touch of leather.");
        assert_eq!(map["Black fruit"], vec!["black cherry"]);
        assert_eq!(map["Oak"], vec!["cedar"]);
        assert_eq!(map["Floral"], vec!["violet"]);
        assert_eq!(map["Bottle age (Red)"], vec!["leather"]);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn matches_whole_words_only() {
        let map = derive_cluster_map("grapefruit and prose");
        assert!(map.contains_key("Citrus fruit"));
        assert!(!map.contains_key("Green fruit"));
        assert!(!map.contains_key("Floral"));
    }

    #[test]
    fn shared_descriptors_count_once_when_flattened() {
        let map = derive_cluster_map("toast");
        assert_eq!(map.len(), 3);
        assert_eq!(distinct_descriptors(&map).len(), 1);
    }

    #[test]
    fn empty_text_has_no_clusters() {
        assert!(derive_cluster_map("").is_empty());
    }
}
