//! Wine-domain reference vocabulary.

/// Short terms that make a tiny text block worth keeping.
pub const SHORT_TERMS: &[&str] = &[
    // label metadata
    "abv", "alc", "alcohol", "vintage", "score", "rating", "points", "pts", "price", "usd", "eur",
    "retail",
    // style
    "dry", "sweet", "bold", "tannic", "acidic", "balanced", "complex", "elegant",
    // countries
    "france", "italy", "spain", "usa", "chile", "argentina", "germany", "australia",
    "new zealand", "portugal", "south africa", "austria",
    // regions
    "bordeaux", "burgundy", "napa", "sonoma", "rhone", "loire", "alsace", "tuscany", "barolo",
    "mosel", "rioja", "chianti", "swartland", "mendoza", "willamette", "mclaren", "etna",
    "priorat", "rías baixas",
    // grapes
    "pinot", "chardonnay", "syrah", "tempranillo", "grenache", "sangiovese", "malbec", "merlot",
    "cabernet", "viognier", "nebbiolo", "carignan", "zinfandel", "riesling", "muscat", "chenin",
    "barbera", "gruner", "corvina",
    // critics
    "parker", "atkin", "suckling", "vinous", "decanter", "jancis", "cellartracker",
    // vintages
    "2017", "2018", "2019", "2020", "2021", "2022", "2023", "2024", "2025",
    // pairings
    "steak", "duck", "seafood", "cheese", "pasta", "lamb", "salmon", "roast", "charcuterie",
    // tasting
    "floral", "spicy", "earthy", "citrus", "herbal", "vanilla", "blackberry", "cherry",
    "stone fruit", "minerality", "chalky", "smoky", "nutty", "jammy",
    // texture
    "grippy", "silky", "velvety", "lush", "round", "structured", "linear",
    // classifications
    "reserve", "reserva", "grand cru", "crianza", "superiore", "premier cru", "village",
    "classico", "igp", "doc", "docg", "ava", "aoc",
    // critic initials
    "rp", "js", "jr", "ta", "wa", "ws", "we", "vn",
    // production
    "unfiltered", "natural", "organic", "biodynamic", "oak aged", "barrel fermented",
    "wild yeast", "lees", "malolactic", "hand-harvested",
];

/// Sentences describing what wine writing talks about. Blocks are compared
/// against each sentence and the best score counts.
pub const REFERENCE_SENTENCES: &[&str] = &[
    "Wine labels list grape varieties such as Pinot Noir, Cabernet Sauvignon, Merlot, Syrah, Grenache, Tempranillo, Chardonnay, Riesling and Chenin Blanc.",
    "Pinot Noir shows red fruit and earthiness while Syrah offers spice and black fruit.",
    "Blended wines combine varietals, like Grenache Syrah Mourvèdre or Bordeaux blends with Merlot and Cabernet Franc.",
    "Regions like Bordeaux, Burgundy, Napa Valley, Barolo, Rioja, Mendoza, Mosel, Tuscany and Swartland are famous for their terroir.",
    "Subregions such as Pauillac, Rutherford, Stellenbosch and Côte-Rôtie influence a wine's profile.",
    "AOC, DOCG, IGP and AVA indicate regional quality classifications.",
    "Vintage years such as 2015, 2018, 2019 and 2020 reflect harvest conditions.",
    "Tasting notes describe aromas and flavors like black cherry, cassis, green pepper, tobacco, violets, vanilla, earth and wet stone.",
    "Full-bodied wine with medium acidity, soft tannins, a long finish and a complex bouquet.",
    "Wines are aged in French or American oak barrels, stainless steel or amphora.",
    "Winemaking includes wild fermentation, whole cluster pressing, lees stirring and malolactic conversion.",
    "Estate grown, old vines, barrel aged, unfiltered and hand-harvested wine.",
    "The wine price is $45, €90, USD 120 or £35 per bottle.",
    "Alcohol by volume of 13%, 13.5% or 14.1% ABV describes wine strength.",
    "Critics like Robert Parker, Tim Atkin, Jancis Robinson, Antonio Galloni and James Suckling publish wine scores.",
    "Wine Spectator, Decanter, Wine Advocate and Vinous rate wines 94 points or 96/100.",
    "Pair red wine with steak or lamb, white wine with seafood, and Pinot Noir with duck.",
    "Terroir, minerality, acidity, body and structure are essential wine terms.",
    "Jammy, smoky, citrus, floral and herbal notes are common in tasting notes.",
    "The texture is velvety, chalky, grippy or lush depending on tannin and acidity.",
    "Grand Cru, Premier Cru, Classico, Reserva and Crianza signal quality and aging.",
    "Natural, organic and biodynamic wines are increasingly popular.",
    "Retailers offer case discounts, magnums and library releases of the wine.",
];

/// Canonical phrasings of a long finish.
pub const LONG_FINISH_PHRASES: &[&str] = &[
    "long finish",
    "lingering finish",
    "persistent finish",
    "long aftertaste",
    "lingering aftertaste",
    "long length",
    "extended finish",
    "endless finish",
];
