//! Story data models and API request/response types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryTone {
    Calm,
    #[default]
    Empowering,
    Bedtime,
    Adventure,
}

impl StoryTone {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryTone::Calm => "calm",
            StoryTone::Empowering => "empowering",
            StoryTone::Bedtime => "bedtime",
            StoryTone::Adventure => "adventure",
        }
    }

    /// Style instruction handed to the language model.
    pub fn guidance(&self) -> &'static str {
        match self {
            StoryTone::Calm => "gentle, soothing, and reassuring with soft transitions",
            StoryTone::Empowering => {
                "encouraging, brave, and confidence-building with triumphant moments"
            }
            StoryTone::Bedtime => "peaceful, dreamy, sleepy with gentle resolution",
            StoryTone::Adventure => "exciting but safe, fun and engaging with positive outcomes",
        }
    }
}

/// One illustrated beat of a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub scene_number: i32,
    pub description: String,
    #[serde(default)]
    pub characters_present: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
}

/// Represents a generated story from the database.
///
/// # Database Table
///
/// Maps to the `stories` table. `sunshine_id` is cleared when the profile
/// is hard-deleted so the story itself survives.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Story {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sunshine_id: Option<Uuid>,
    pub title: String,
    pub story_text: String,
    pub tone: String,
    pub child_name: String,
    pub age: i32,
    pub fear_or_challenge: Option<String>,
    pub favorite_items: Json<Vec<String>>,
    /// name -> relationship
    pub family_members: Json<BTreeMap<String, String>>,
    pub scenes: Json<Vec<Scene>>,
    pub image_urls: Json<Vec<String>>,
    pub pdf_url: Option<String>,
    pub reading_time: i32,
    pub word_count: Option<i32>,
    pub rating: Option<f32>,
    pub is_favorite: bool,
    pub read_count: i32,
    pub model_used: Option<String>,
    pub generation_time: Option<f64>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Request to generate a story for one of the caller's profiles.
///
/// # JSON Example
///
/// ```json
/// {
///   "sunshine_id": "550e8400-e29b-41d4-a716-446655440000",
///   "fear_or_challenge": "going to the dentist",
///   "tone": "calm",
///   "include_family": true,
///   "include_comfort_items": true,
///   "custom_elements": ["a rainbow umbrella"]
/// }
/// ```
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateStoryRequest {
    pub sunshine_id: Uuid,

    #[validate(length(min = 1, max = 500, message = "Fear or challenge must be 1-500 characters"))]
    pub fear_or_challenge: String,

    #[serde(default)]
    pub tone: StoryTone,

    #[serde(default = "default_true")]
    pub include_family: bool,

    #[serde(default = "default_true")]
    pub include_comfort_items: bool,

    #[serde(default)]
    pub custom_elements: Vec<String>,

    /// Anything other than English needs the multi-language feature
    #[serde(default = "default_language")]
    pub language: String,
}

impl GenerateStoryRequest {
    pub fn is_english(&self) -> bool {
        self.language.trim().eq_ignore_ascii_case("english") || self.language.trim().is_empty()
    }
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "english".to_string()
}

/// Response of `POST /stories/generate`.
#[derive(Debug, Serialize)]
pub struct StoryGenerationResponse {
    pub story_id: Uuid,
    pub title: String,
    pub story_text: String,
    pub scenes: Vec<Scene>,
    pub image_urls: Vec<String>,
    pub reading_time: i32,
    pub word_count: i32,
    /// `subscription`, `individual_credit`, `free_tier` or `unlimited`
    pub usage_type: String,
    /// Stories left this period after this one; -1 when unlimited
    pub credits_remaining: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct StoryHistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    10
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct StoryHistoryItem {
    pub id: Uuid,
    pub title: String,
    pub child_name: String,
    pub created_at: DateTime<Utc>,
    pub word_count: Option<i32>,
    pub reading_time: i32,
}

#[derive(Debug, Serialize)]
pub struct StoryResponse {
    pub id: Uuid,
    pub sunshine_id: Option<Uuid>,
    pub title: String,
    pub story_text: String,
    pub child_name: String,
    pub age: i32,
    pub fear_or_challenge: Option<String>,
    pub tone: String,
    pub favorite_items: Vec<String>,
    pub family_members: BTreeMap<String, String>,
    pub scenes: Vec<Scene>,
    pub image_urls: Vec<String>,
    pub pdf_url: Option<String>,
    pub reading_time: i32,
    pub word_count: Option<i32>,
    pub rating: Option<f32>,
    pub is_favorite: bool,
    pub read_count: i32,
    pub created_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

impl From<Story> for StoryResponse {
    fn from(story: Story) -> Self {
        Self {
            id: story.id,
            sunshine_id: story.sunshine_id,
            title: story.title,
            story_text: story.story_text,
            child_name: story.child_name,
            age: story.age,
            fear_or_challenge: story.fear_or_challenge,
            tone: story.tone,
            favorite_items: story.favorite_items.0,
            family_members: story.family_members.0,
            scenes: story.scenes.0,
            image_urls: story.image_urls.0,
            pdf_url: story.pdf_url,
            reading_time: story.reading_time,
            word_count: story.word_count,
            rating: story.rating,
            is_favorite: story.is_favorite,
            read_count: story.read_count,
            created_at: story.created_at,
            last_read_at: story.last_read_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RateStoryRequest {
    #[validate(range(min = 1.0, max = 5.0, message = "Rating must be between 1 and 5"))]
    pub rating: f32,
}

#[derive(Debug, Serialize)]
pub struct RatingResponse {
    pub rating: f32,
}

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub is_favorite: bool,
}

/// Static sample served to visitors before they sign up.
#[derive(Debug, Serialize)]
pub struct ExampleStory {
    pub title: String,
    pub story_text: String,
    pub child_name: String,
    pub tone: StoryTone,
    pub scenes: Vec<Scene>,
}

impl ExampleStory {
    pub fn emma() -> Self {
        Self {
            title: "Emma's Brave Night".to_string(),
            story_text: "Emma used to be afraid of the dark, but with her teddy bear and mom's help, \
                         she learned that nighttime can be peaceful and safe."
                .to_string(),
            child_name: "Emma".to_string(),
            tone: StoryTone::Empowering,
            scenes: vec![Scene {
                scene_number: 1,
                description: "Emma feeling scared at bedtime".to_string(),
                characters_present: vec!["Emma".to_string()],
                image_prompt: Some(
                    "A young girl named Emma holding a teddy bear, looking a bit worried at bedtime"
                        .to_string(),
                ),
                mood: None,
            }],
        }
    }
}
