use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub aspect_ratio: String,
    pub duration_secs: u32,
    pub preview_url: String,
}

/// Static catalog of generation templates.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            template(
                "product-showcase",
                "Product Showcase",
                "Rotating hero shots with price callout and call to action.",
                "ecommerce",
                "16:9",
                30,
            ),
            template(
                "social-story",
                "Social Story",
                "Vertical, fast-cut story sized for Instagram and TikTok.",
                "social",
                "9:16",
                15,
            ),
            template(
                "flash-sale",
                "Flash Sale",
                "Countdown overlay with bold discount typography.",
                "promotion",
                "1:1",
                10,
            ),
            template(
                "unboxing",
                "Unboxing",
                "Step-by-step reveal of the product and its packaging.",
                "ecommerce",
                "16:9",
                45,
            ),
        ])
    }

    pub fn all(&self) -> &[Template] {
        &self.templates
    }

    pub fn find(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|template| template.id == id)
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn template(
    id: &str,
    name: &str,
    description: &str,
    category: &str,
    aspect_ratio: &str,
    duration_secs: u32,
) -> Template {
    Template {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        aspect_ratio: aspect_ratio.to_string(),
        duration_secs,
        preview_url: format!("/previews/{id}.mp4"),
    }
}
