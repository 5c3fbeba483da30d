//! Animal profile models

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Where an animal currently is in the shelter workflow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnimalStatus {
    #[default]
    Available,
    Adopted,
    Foster,
    MedicalHold,
    BehaviorHold,
    Deceased,
}

impl AnimalStatus {
    pub const ALL: [AnimalStatus; 6] = [
        AnimalStatus::Available,
        AnimalStatus::Adopted,
        AnimalStatus::Foster,
        AnimalStatus::MedicalHold,
        AnimalStatus::BehaviorHold,
        AnimalStatus::Deceased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnimalStatus::Available => "available",
            AnimalStatus::Adopted => "adopted",
            AnimalStatus::Foster => "foster",
            AnimalStatus::MedicalHold => "medical_hold",
            AnimalStatus::BehaviorHold => "behavior_hold",
            AnimalStatus::Deceased => "deceased",
        }
    }
}

impl std::fmt::Display for AnimalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnimalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        AnimalStatus::ALL
            .iter()
            .find(|status| status.as_str() == normalized)
            .copied()
            .ok_or_else(|| format!("unknown animal status '{}'", s))
    }
}

/// Biological sex as recorded on intake
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Unknown => "unknown",
        }
    }
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Sex::Male),
            "female" | "f" => Ok(Sex::Female),
            "" | "unknown" | "u" => Ok(Sex::Unknown),
            other => Err(format!("unknown sex '{}'", other)),
        }
    }
}

/// Input for creating an animal profile
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAnimalInput {
    #[validate(length(min = 1, max = 80))]
    pub name: String,
    #[validate(length(min = 1, max = 40))]
    pub species: String,
    #[validate(length(max = 80))]
    pub breed: Option<String>,
    #[serde(default)]
    pub sex: Sex,
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: AnimalStatus,
    #[validate(length(max = 40))]
    pub kennel: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub weight_lbs: Option<Decimal>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
}

/// Input for updating an animal profile
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateAnimalInput {
    #[validate(length(min = 1, max = 80))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 40))]
    pub species: Option<String>,
    #[validate(length(max = 80))]
    pub breed: Option<String>,
    pub sex: Option<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub status: Option<AnimalStatus>,
    #[validate(length(max = 40))]
    pub kennel: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub weight_lbs: Option<Decimal>,
    /// Move the animal to another group
    pub group_id: Option<Uuid>,
}

/// Sort key for animal listings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnimalSort {
    #[default]
    Name,
    Updated,
    LastComment,
}

impl AnimalSort {
    pub fn column(&self) -> &'static str {
        match self {
            AnimalSort::Name => "a.name",
            AnimalSort::Updated => "a.updated_at",
            AnimalSort::LastComment => "a.last_comment_at",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_loose_spellings() {
        assert_eq!("Medical Hold".parse::<AnimalStatus>().unwrap(), AnimalStatus::MedicalHold);
        assert_eq!("behavior-hold".parse::<AnimalStatus>().unwrap(), AnimalStatus::BehaviorHold);
        assert_eq!(" adopted ".parse::<AnimalStatus>().unwrap(), AnimalStatus::Adopted);
        assert!("missing".parse::<AnimalStatus>().is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in AnimalStatus::ALL {
            assert_eq!(status.as_str().parse::<AnimalStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_sex_parsing() {
        assert_eq!("F".parse::<Sex>().unwrap(), Sex::Female);
        assert_eq!("".parse::<Sex>().unwrap(), Sex::Unknown);
        assert!("x".parse::<Sex>().is_err());
    }
}
