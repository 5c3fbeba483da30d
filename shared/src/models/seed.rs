//! Seed data inserted into fresh databases

/// A group created on first start
#[derive(Debug, Clone, Copy)]
pub struct SeedGroup {
    pub name: &'static str,
    pub description: &'static str,
}

pub const DEFAULT_GROUPS: &[SeedGroup] = &[
    SeedGroup {
        name: "ModSquad",
        description: "Behavior modification volunteers working with dogs on hold",
    },
    SeedGroup {
        name: "Dog Walkers",
        description: "General dog walking and enrichment",
    },
    SeedGroup {
        name: "Cat Cuddlers",
        description: "Socialization for cats and kittens",
    },
];

/// Comment tags every group starts with (name, color)
pub const DEFAULT_COMMENT_TAGS: &[(&str, &str)] = &[
    ("Walk", "#2563EB"),
    ("Playgroup", "#16A34A"),
    ("Training", "#9333EA"),
    ("Medical", "#DC2626"),
    ("Behavior", "#EA580C"),
];

/// Animal tags every group starts with (name, color)
pub const DEFAULT_ANIMAL_TAGS: &[(&str, &str)] = &[
    ("Dog Friendly", "#16A34A"),
    ("No Cats", "#DC2626"),
    ("Leash Reactive", "#EA580C"),
    ("Kid Friendly", "#2563EB"),
];
