use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Starters,
    Mains,
    Desserts,
    Drinks,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Starters,
        Category::Mains,
        Category::Desserts,
        Category::Drinks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Starters => "Starters",
            Category::Mains => "Mains",
            Category::Desserts => "Desserts",
            Category::Drinks => "Drinks",
        }
    }

    /// Accepts the English names and the French labels shown on the menu.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "starters" | "entrées" | "entrees" => Some(Category::Starters),
            "mains" | "plats" => Some(Category::Mains),
            "desserts" => Some(Category::Desserts),
            "drinks" | "boissons" => Some(Category::Drinks),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: Category,
    /// Static placeholder shown until an AI image exists for this item.
    pub image: String,
    pub generation_prompt: String,
    pub calories: u32,
    pub is_vegetarian: bool,
}

pub fn find_item<'a>(items: &'a [MenuItem], id: &str) -> Option<&'a MenuItem> {
    let id = id.trim();
    items.iter().find(|item| item.id == id)
}

/// Items in `category` (all categories when `None`) whose name or
/// description contains `query`, case-insensitively.
pub fn filter_menu<'a>(
    items: &'a [MenuItem],
    category: Option<Category>,
    query: &str,
) -> Vec<&'a MenuItem> {
    let needle = query.trim().to_lowercase();
    items
        .iter()
        .filter(|item| category.map_or(true, |wanted| item.category == wanted))
        .filter(|item| {
            needle.is_empty()
                || item.name.to_lowercase().contains(&needle)
                || item.description.to_lowercase().contains(&needle)
        })
        .collect()
}

pub fn default_menu() -> Vec<MenuItem> {
    let mut items = Vec::new();
    let mut insert = |id: &str,
                      name: &str,
                      description: &str,
                      price: f64,
                      category: Category,
                      generation_prompt: &str,
                      calories: u32,
                      is_vegetarian: bool| {
        items.push(MenuItem {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            price,
            category,
            image: format!("placeholders/{id}.jpg"),
            generation_prompt: generation_prompt.to_string(),
            calories,
            is_vegetarian,
        });
    };

    insert(
        "dish-1",
        "Caviar Osciètre & Perles de Yuzu",
        "Caviar osciètre, crème crue fumée, perles de yuzu et blinis tièdes.",
        68.0,
        Category::Starters,
        "Oscietra caviar quenelle on smoked cream with yuzu pearls and a warm blini",
        320,
        false,
    );
    insert(
        "dish-2",
        "Velouté de Cèpes à la Truffe",
        "Velouté de cèpes des Landes, copeaux de truffe noire du Périgord.",
        42.0,
        Category::Starters,
        "Porcini velouté in a black bowl with shaved Perigord black truffle",
        280,
        true,
    );
    insert(
        "dish-3",
        "Homard Bleu Rôti au Beurre Noisette",
        "Homard breton rôti, beurre noisette, carottes fanes glacées.",
        96.0,
        Category::Mains,
        "Roasted Brittany blue lobster with brown butter and glazed heirloom carrots",
        640,
        false,
    );
    insert(
        "dish-4",
        "Pigeon de Bresse en Croûte de Cacao",
        "Suprême de pigeon, croûte de cacao, jus corsé au vin de Porto.",
        84.0,
        Category::Mains,
        "Pink-roasted Bresse pigeon breast with cocoa crust and glossy port reduction",
        710,
        false,
    );
    insert(
        "dish-5",
        "Jardin de Légumes Oubliés",
        "Légumes anciens du potager, émulsion d'herbes et terre de noisettes.",
        58.0,
        Category::Mains,
        "Garden of heirloom root vegetables with herb emulsion and hazelnut soil",
        410,
        true,
    );
    insert(
        "dish-6",
        "Sphère Chocolat Grand Cru",
        "Sphère de chocolat Grand Cru fondue au caramel beurre salé chaud.",
        36.0,
        Category::Desserts,
        "Grand cru chocolate sphere melting under hot salted butter caramel",
        520,
        true,
    );
    insert(
        "dish-7",
        "Soufflé Chaud au Grand Marnier",
        "Soufflé aérien au Grand Marnier, sorbet orange sanguine.",
        32.0,
        Category::Desserts,
        "Tall Grand Marnier souffle with blood orange sorbet quenelle",
        450,
        true,
    );
    insert(
        "dish-8",
        "Accord Champagne Millésimé",
        "Coupe de champagne millésimé, sélection du chef sommelier.",
        45.0,
        Category::Drinks,
        "Vintage champagne coupe with fine bubbles beside a silver bucket",
        120,
        true,
    );

    items
}
