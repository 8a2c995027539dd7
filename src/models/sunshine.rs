//! Sunshine (child profile) data models and API request/response types.
//!
//! This module defines:
//! - `Sunshine`, `FamilyMember`, `ComfortItem`, `PersonalityTrait`: database rows
//! - Create/update request bodies for each of them
//! - `SunshineResponse`, `SunshineSummary`, `CharacterReference`: response bodies

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
    PreferNotToSay,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::NonBinary => "non_binary",
            Gender::PreferNotToSay => "prefer_not_to_say",
        }
    }

    /// Pronouns used when the profile does not set its own.
    pub fn default_pronouns(&self) -> &'static str {
        match self {
            Gender::Male => "he/him",
            Gender::Female => "she/her",
            Gender::NonBinary | Gender::PreferNotToSay => "they/them",
        }
    }
}

/// Pronouns for a stored gender string; unknown values get they/them.
pub fn default_pronouns_for(gender: &str) -> &'static str {
    match gender {
        "male" => Gender::Male.default_pronouns(),
        "female" => Gender::Female.default_pronouns(),
        _ => "they/them",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyRelationship {
    Mother,
    Father,
    Sister,
    Brother,
    Grandmother,
    Grandfather,
    Aunt,
    Uncle,
    Cousin,
    Guardian,
    Pet,
    Other,
}

impl FamilyRelationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyRelationship::Mother => "mother",
            FamilyRelationship::Father => "father",
            FamilyRelationship::Sister => "sister",
            FamilyRelationship::Brother => "brother",
            FamilyRelationship::Grandmother => "grandmother",
            FamilyRelationship::Grandfather => "grandfather",
            FamilyRelationship::Aunt => "aunt",
            FamilyRelationship::Uncle => "uncle",
            FamilyRelationship::Cousin => "cousin",
            FamilyRelationship::Guardian => "guardian",
            FamilyRelationship::Pet => "pet",
            FamilyRelationship::Other => "other",
        }
    }
}

/// Whole years between `birthdate` and `today`.
///
/// One is subtracted when the birthday has not yet come round this year.
pub fn age_on(birthdate: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birthdate.year();
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        age -= 1;
    }
    age
}

pub fn age_today(birthdate: NaiveDate) -> i32 {
    age_on(birthdate, Utc::now().date_naive())
}

/// Represents a child profile from the database.
///
/// # Database Table
///
/// Maps to the `sunshines` table. Profiles belong to exactly one user and
/// are soft-deleted by clearing `is_active`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Sunshine {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub birthdate: NaiveDate,
    pub gender: String,
    pub pronouns: Option<String>,
    pub nickname: Option<String>,
    pub favorite_color: Option<String>,
    pub favorite_animal: Option<String>,
    pub favorite_food: Option<String>,
    pub favorite_activity: Option<String>,
    pub fears: Json<Vec<String>>,
    pub dreams: Json<Vec<String>>,
    pub allergies: Json<Vec<String>>,
    pub special_needs: Option<String>,
    pub bedtime_routine: Option<String>,
    pub personality_summary: Option<String>,
    pub additional_notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Sunshine {
    pub fn age(&self) -> i32 {
        age_today(self.birthdate)
    }

    pub fn pronouns_or_default(&self) -> String {
        self.pronouns
            .clone()
            .unwrap_or_else(|| default_pronouns_for(&self.gender).to_string())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FamilyMember {
    pub id: Uuid,
    pub sunshine_id: Uuid,
    pub name: String,
    pub relation_type: String,
    pub relation_custom: Option<String>,
    pub age: Option<i32>,
    pub description: Option<String>,
    pub personality_traits: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ComfortItem {
    pub id: Uuid,
    pub sunshine_id: Uuid,
    pub name: String,
    pub item_type: String,
    pub description: Option<String>,
    pub significance: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PersonalityTrait {
    pub id: Uuid,
    pub sunshine_id: Uuid,
    #[sqlx(rename = "trait")]
    pub trait_name: String,
    pub description: Option<String>,
    pub strength: i32,
    pub created_at: DateTime<Utc>,
}

/// Request to add a personality trait (also nested in `SunshineCreate`).
///
/// # JSON Example
///
/// ```json
/// { "trait": "curious", "description": "asks why about everything", "strength": 4 }
/// ```
#[derive(Debug, Deserialize, Validate)]
pub struct PersonalityTraitCreate {
    #[serde(rename = "trait")]
    #[validate(length(min = 1, max = 100))]
    pub trait_name: String,

    pub description: Option<String>,

    #[serde(default = "default_strength")]
    #[validate(range(min = 1, max = 5, message = "Strength must be between 1 and 5"))]
    pub strength: i32,
}

fn default_strength() -> i32 {
    3
}

/// Request to create a child profile.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "Maya",
///   "birthdate": "2019-04-12",
///   "gender": "female",
///   "favorite_color": "purple",
///   "fears": ["the dark"],
///   "personality_traits": [{ "trait": "brave", "strength": 4 }]
/// }
/// ```
///
/// # Validation
///
/// - `name` must be 1..=100 characters
/// - every nested trait strength must be within 1..=5
#[derive(Debug, Deserialize, Validate)]
pub struct SunshineCreate {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub birthdate: NaiveDate,
    pub gender: Gender,
    pub pronouns: Option<String>,
    pub nickname: Option<String>,
    pub favorite_color: Option<String>,
    pub favorite_animal: Option<String>,
    pub favorite_food: Option<String>,
    pub favorite_activity: Option<String>,
    #[serde(default)]
    pub fears: Vec<String>,
    #[serde(default)]
    pub dreams: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub special_needs: Option<String>,
    pub bedtime_routine: Option<String>,
    pub personality_summary: Option<String>,
    pub additional_notes: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub personality_traits: Vec<PersonalityTraitCreate>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SunshineUpdate {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub pronouns: Option<String>,
    pub nickname: Option<String>,
    pub favorite_color: Option<String>,
    pub favorite_animal: Option<String>,
    pub favorite_food: Option<String>,
    pub favorite_activity: Option<String>,
    pub fears: Option<Vec<String>>,
    pub dreams: Option<Vec<String>>,
    pub allergies: Option<Vec<String>>,
    pub special_needs: Option<String>,
    pub bedtime_routine: Option<String>,
    pub personality_summary: Option<String>,
    pub additional_notes: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FamilyMemberCreate {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub relationship: FamilyRelationship,
    /// Free text used when `relationship` is `other`
    pub relationship_custom: Option<String>,
    #[validate(range(min = 0, max = 150))]
    pub age: Option<i32>,
    pub description: Option<String>,
    #[serde(default)]
    pub personality_traits: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct FamilyMemberUpdate {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub relationship: Option<FamilyRelationship>,
    pub relationship_custom: Option<String>,
    #[validate(range(min = 0, max = 150))]
    pub age: Option<i32>,
    pub description: Option<String>,
    pub personality_traits: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ComfortItemCreate {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// toy, blanket, stuffed_animal, ...
    #[validate(length(min = 1, max = 50))]
    pub item_type: String,
    pub description: Option<String>,
    /// Why the item matters to the child
    pub significance: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ComfortItemUpdate {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub significance: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListSunshinesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteSunshineQuery {
    /// Remove the row instead of deactivating it
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Serialize)]
pub struct FamilyMemberResponse {
    pub id: Uuid,
    pub sunshine_id: Uuid,
    pub name: String,
    pub relationship: String,
    pub relationship_custom: Option<String>,
    pub age: Option<i32>,
    pub description: Option<String>,
    pub personality_traits: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<FamilyMember> for FamilyMemberResponse {
    fn from(member: FamilyMember) -> Self {
        Self {
            id: member.id,
            sunshine_id: member.sunshine_id,
            name: member.name,
            relationship: member.relation_type,
            relationship_custom: member.relation_custom,
            age: member.age,
            description: member.description,
            personality_traits: member.personality_traits.0,
            created_at: member.created_at,
            updated_at: member.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ComfortItemResponse {
    pub id: Uuid,
    pub sunshine_id: Uuid,
    pub name: String,
    pub item_type: String,
    pub description: Option<String>,
    pub significance: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ComfortItem> for ComfortItemResponse {
    fn from(item: ComfortItem) -> Self {
        Self {
            id: item.id,
            sunshine_id: item.sunshine_id,
            name: item.name,
            item_type: item.item_type,
            description: item.description,
            significance: item.significance,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PersonalityTraitResponse {
    pub id: Uuid,
    pub sunshine_id: Uuid,
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub description: Option<String>,
    pub strength: i32,
}

impl From<PersonalityTrait> for PersonalityTraitResponse {
    fn from(t: PersonalityTrait) -> Self {
        Self {
            id: t.id,
            sunshine_id: t.sunshine_id,
            trait_name: t.trait_name,
            description: t.description,
            strength: t.strength,
        }
    }
}

/// Full profile with its family, comfort items and traits.
#[derive(Debug, Serialize)]
pub struct SunshineResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub birthdate: NaiveDate,
    pub age: i32,
    pub gender: String,
    pub pronouns: Option<String>,
    pub nickname: Option<String>,
    pub favorite_color: Option<String>,
    pub favorite_animal: Option<String>,
    pub favorite_food: Option<String>,
    pub favorite_activity: Option<String>,
    pub fears: Vec<String>,
    pub dreams: Vec<String>,
    pub allergies: Vec<String>,
    pub special_needs: Option<String>,
    pub bedtime_routine: Option<String>,
    pub personality_summary: Option<String>,
    pub additional_notes: Option<String>,
    pub is_active: bool,
    pub family_members: Vec<FamilyMemberResponse>,
    pub comfort_items: Vec<ComfortItemResponse>,
    pub personality_traits: Vec<PersonalityTraitResponse>,
    pub stories_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A profile loaded together with its child rows.
#[derive(Debug, Clone)]
pub struct SunshineDetails {
    pub sunshine: Sunshine,
    pub family_members: Vec<FamilyMember>,
    pub comfort_items: Vec<ComfortItem>,
    pub personality_traits: Vec<PersonalityTrait>,
    pub stories_count: i64,
}

impl From<SunshineDetails> for SunshineResponse {
    fn from(details: SunshineDetails) -> Self {
        let s = details.sunshine;
        Self {
            age: age_today(s.birthdate),
            id: s.id,
            user_id: s.user_id,
            name: s.name,
            birthdate: s.birthdate,
            gender: s.gender,
            pronouns: s.pronouns,
            nickname: s.nickname,
            favorite_color: s.favorite_color,
            favorite_animal: s.favorite_animal,
            favorite_food: s.favorite_food,
            favorite_activity: s.favorite_activity,
            fears: s.fears.0,
            dreams: s.dreams.0,
            allergies: s.allergies.0,
            special_needs: s.special_needs,
            bedtime_routine: s.bedtime_routine,
            personality_summary: s.personality_summary,
            additional_notes: s.additional_notes,
            is_active: s.is_active,
            family_members: details.family_members.into_iter().map(Into::into).collect(),
            comfort_items: details.comfort_items.into_iter().map(Into::into).collect(),
            personality_traits: details
                .personality_traits
                .into_iter()
                .map(Into::into)
                .collect(),
            stories_count: details.stories_count,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Row shape of the summary listing query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SunshineSummaryRow {
    pub id: Uuid,
    pub name: String,
    pub nickname: Option<String>,
    pub birthdate: NaiveDate,
    pub gender: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub stories_count: i64,
}

#[derive(Debug, Serialize)]
pub struct SunshineSummary {
    pub id: Uuid,
    pub name: String,
    pub nickname: Option<String>,
    pub age: i32,
    pub gender: String,
    pub stories_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<SunshineSummaryRow> for SunshineSummary {
    fn from(row: SunshineSummaryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            nickname: row.nickname,
            age: age_today(row.birthdate),
            gender: row.gender,
            stories_count: row.stories_count,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PhysicalDescription {
    pub age: i32,
    pub gender: String,
    pub favorite_color: Option<String>,
    pub special_features: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FamilyReference {
    pub name: String,
    pub relationship: String,
    pub age: Option<i32>,
    pub traits: Vec<String>,
}

/// Everything an illustrator or story prompt needs to depict the child
/// consistently.
#[derive(Debug, Serialize)]
pub struct CharacterReference {
    pub sunshine_id: Uuid,
    pub name: String,
    pub age: i32,
    pub gender: String,
    pub pronouns: String,
    pub physical_description: PhysicalDescription,
    /// `"<trait> (<strength>/5)"`
    pub personality_traits: Vec<String>,
    pub family_members: Vec<FamilyReference>,
    pub comfort_items: Vec<String>,
}

impl CharacterReference {
    pub fn from_details(details: &SunshineDetails, today: NaiveDate) -> Self {
        let s = &details.sunshine;
        let age = age_on(s.birthdate, today);

        Self {
            sunshine_id: s.id,
            name: s.name.clone(),
            age,
            gender: s.gender.clone(),
            pronouns: s.pronouns_or_default(),
            physical_description: PhysicalDescription {
                age,
                gender: s.gender.clone(),
                favorite_color: s.favorite_color.clone(),
                special_features: s.special_needs.clone(),
            },
            personality_traits: details
                .personality_traits
                .iter()
                .map(|t| format!("{} ({}/5)", t.trait_name, t.strength))
                .collect(),
            family_members: details
                .family_members
                .iter()
                .map(|m| FamilyReference {
                    name: m.name.clone(),
                    relationship: m.relation_type.clone(),
                    age: m.age,
                    traits: m.personality_traits.0.clone(),
                })
                .collect(),
            comfort_items: details.comfort_items.iter().map(|c| c.name.clone()).collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn sunshine(user_id: Uuid) -> Sunshine {
        Sunshine {
            id: Uuid::new_v4(),
            user_id,
            name: "Maya".to_string(),
            birthdate: NaiveDate::from_ymd_opt(2019, 4, 12).unwrap(),
            gender: "female".to_string(),
            pronouns: None,
            nickname: Some("May".to_string()),
            favorite_color: Some("purple".to_string()),
            favorite_animal: Some("owl".to_string()),
            favorite_food: None,
            favorite_activity: Some("painting".to_string()),
            fears: Json(vec!["the dark".to_string()]),
            dreams: Json(vec![]),
            allergies: Json(vec![]),
            special_needs: Some("wears glasses".to_string()),
            bedtime_routine: None,
            personality_summary: None,
            additional_notes: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn family_member(sunshine_id: Uuid, name: &str, relation: &str) -> FamilyMember {
        FamilyMember {
            id: Uuid::new_v4(),
            sunshine_id,
            name: name.to_string(),
            relation_type: relation.to_string(),
            relation_custom: None,
            age: Some(35),
            description: None,
            personality_traits: Json(vec!["patient".to_string()]),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn comfort_item(sunshine_id: Uuid, name: &str) -> ComfortItem {
        ComfortItem {
            id: Uuid::new_v4(),
            sunshine_id,
            name: name.to_string(),
            item_type: "stuffed_animal".to_string(),
            description: None,
            significance: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn details() -> SunshineDetails {
        let sunshine = sunshine(Uuid::new_v4());
        let id = sunshine.id;
        SunshineDetails {
            sunshine,
            family_members: vec![family_member(id, "Rosa", "mother")],
            comfort_items: vec![comfort_item(id, "Mr. Hoot")],
            personality_traits: vec![PersonalityTrait {
                id: Uuid::new_v4(),
                sunshine_id: id,
                trait_name: "brave".to_string(),
                description: None,
                strength: 4,
                created_at: Utc::now(),
            }],
            stories_count: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn age_counts_only_passed_birthdays() {
        let birthdate = date(2018, 6, 15);

        assert_eq!(age_on(birthdate, date(2024, 6, 14)), 5);
        assert_eq!(age_on(birthdate, date(2024, 6, 15)), 6);
        assert_eq!(age_on(birthdate, date(2024, 12, 1)), 6);
    }

    #[test]
    fn pronouns_default_from_gender() {
        assert_eq!(Gender::Male.default_pronouns(), "he/him");
        assert_eq!(Gender::Female.default_pronouns(), "she/her");
        assert_eq!(Gender::NonBinary.default_pronouns(), "they/them");
        assert_eq!(default_pronouns_for("prefer_not_to_say"), "they/them");
    }

    #[test]
    fn character_reference_formats_traits_and_family() {
        let details = fixtures::details();
        let reference = CharacterReference::from_details(&details, date(2025, 4, 12));

        assert_eq!(reference.age, 6);
        assert_eq!(reference.pronouns, "she/her");
        assert_eq!(reference.personality_traits, vec!["brave (4/5)".to_string()]);
        assert_eq!(reference.family_members[0].relationship, "mother");
        assert_eq!(reference.comfort_items, vec!["Mr. Hoot".to_string()]);
        assert_eq!(
            reference.physical_description.special_features.as_deref(),
            Some("wears glasses")
        );
    }

    #[test]
    fn create_request_rejects_out_of_range_trait() {
        use validator::Validate;

        let body: SunshineCreate = serde_json::from_value(serde_json::json!({
            "name": "Leo",
            "birthdate": "2020-01-01",
            "gender": "male",
            "personality_traits": [{ "trait": "loud", "strength": 7 }]
        }))
        .unwrap();

        assert!(body.validate().is_err());
        assert!(body.fears.is_empty());
    }
}
