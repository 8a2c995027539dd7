//! Story service - personalised story generation and the story library.
//!
//! Generation runs as a pipeline over one child profile:
//!
//! 1. Load the profile and check the caller's quota
//! 2. Build character profiles (the child plus up to three family members)
//! 3. Ask the chat model for `{title, story_text, scenes[], key_message}`
//! 4. Illustrate each scene when the tier includes image generation
//! 5. Persist the story and charge usage in one database transaction
//!
//! A failing or unconfigured language model never fails the request: the
//! deterministic fallback story is used instead. A failing image becomes a
//! placeholder URL.

use std::{collections::BTreeMap, time::Instant};

use serde::Deserialize;
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        story::{
            GenerateStoryRequest, Scene, Story, StoryGenerationResponse, StoryHistoryItem,
            StoryTone,
        },
        subscription::Feature,
        sunshine::SunshineDetails,
    },
    services::{
        openai_client::OpenAiClient,
        usage_service::{self, UsageDecision},
    },
    state::AppState,
};

pub const PLACEHOLDER_IMAGE_URL: &str =
    "https://via.placeholder.com/1024x1024/E6F3FF/4A90E2?text=Story+Scene";

const MAX_FAMILY_CHARACTERS: usize = 3;
const MAX_COMFORT_ITEMS: usize = 2;
const WORDS_PER_MINUTE: usize = 200;

const SYSTEM_PROMPT: &str = "You are an expert children's story writer and child psychologist who \
creates therapeutic social stories. Always maintain character consistency and respond with valid JSON.";

/// How one character should look and behave across text and illustrations.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterProfile {
    pub name: String,
    pub relationship: String,
    pub visual_description: String,
    pub personality_traits: Vec<String>,
    pub role_in_story: String,
}

pub fn default_child_description(age: i32) -> String {
    format!(
        "A cheerful {age}-year-old child with bright eyes and a warm smile, wearing comfortable, colorful clothing"
    )
}

/// The child first, then at most three family members.
pub fn build_character_profiles(details: &SunshineDetails, include_family: bool) -> Vec<CharacterProfile> {
    let child = &details.sunshine;
    let mut profiles = vec![CharacterProfile {
        name: child.name.clone(),
        relationship: "main character".to_string(),
        visual_description: default_child_description(child.age()),
        personality_traits: details
            .personality_traits
            .iter()
            .map(|t| t.trait_name.clone())
            .collect(),
        role_in_story: "brave protagonist who overcomes challenges".to_string(),
    }];

    if include_family {
        profiles.extend(
            details
                .family_members
                .iter()
                .take(MAX_FAMILY_CHARACTERS)
                .map(|member| CharacterProfile {
                    name: member.name.clone(),
                    relationship: member.relation_type.clone(),
                    visual_description: format!("A caring {}", member.relation_type),
                    personality_traits: member.personality_traits.0.clone(),
                    role_in_story: format!(
                        "supportive {} who helps {}",
                        member.relation_type, child.name
                    ),
                }),
        );
    }

    profiles
}

/// Everything the prompt needs besides the profile itself.
#[derive(Debug, Clone)]
pub struct StoryPromptInput<'a> {
    pub fear_or_challenge: &'a str,
    pub tone: StoryTone,
    pub include_comfort_items: bool,
    pub custom_elements: &'a [String],
    pub language: Option<&'a str>,
}

pub fn build_story_prompt(
    details: &SunshineDetails,
    profiles: &[CharacterProfile],
    input: &StoryPromptInput<'_>,
) -> String {
    let name = &details.sunshine.name;
    let age = details.sunshine.age();

    let character_lines: Vec<String> = profiles
        .iter()
        .map(|p| {
            let mut line = format!("- {} ({}): {}", p.name, p.relationship, p.visual_description);
            if !p.personality_traits.is_empty() {
                line.push_str(&format!(" Personality: {}", p.personality_traits.join(", ")));
            }
            line
        })
        .collect();

    let mut favorites: Vec<String> = Vec::new();
    if input.include_comfort_items {
        favorites.extend(
            details
                .comfort_items
                .iter()
                .take(MAX_COMFORT_ITEMS)
                .map(|item| item.name.clone()),
        );
    }
    favorites.extend(input.custom_elements.iter().cloned());
    let favorites = if favorites.is_empty() {
        "None specified".to_string()
    } else {
        favorites.join(", ")
    };

    let language_line = input
        .language
        .map(|language| format!("\n8. Write the entire story in {language}"))
        .unwrap_or_default();

    format!(
        r#"Create a personalized children's social story for {name} to help overcome: "{fear}"

CHARACTER PROFILES (maintain consistency throughout):
{characters}

STORY CONTEXT:
- Main character: {name}, age {age}
- Comfort items/favorites: {favorites}
- Story tone: {tone}
- Setting: familiar, safe environments

REQUIREMENTS:
1. Story length: 300-500 words, age-appropriate for {age}-year-old
2. Include {name} as the brave protagonist who successfully overcomes the challenge
3. Naturally incorporate family members as supportive characters
4. Include comfort items as helpful tools or companions
5. Create 4-5 scenes showing clear progression from challenge to success
6. Use simple, encouraging language appropriate for the child's age
7. End with {name} feeling proud and confident{language_line}

IMPORTANT: Maintain exact character descriptions throughout for visual consistency.

Return as JSON:
{{
    "title": "Engaging, personalized title",
    "story_text": "Complete story with paragraphs separated by \n\n",
    "scenes": [
        {{
            "scene_number": 1,
            "description": "What happens in this scene",
            "characters_present": ["list of characters in scene"],
            "image_prompt": "Detailed visual description including exact character appearances"
        }}
    ],
    "key_message": "The main lesson or encouragement"
}}"#,
        fear = input.fear_or_challenge,
        characters = character_lines.join("\n"),
        tone = input.tone.guidance(),
    )
}

/// Story text and scenes, from the model or the fallback.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoryContent {
    pub title: String,
    pub story_text: String,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub key_message: Option<String>,
}

/// Parse the model's JSON answer.
///
/// Scenes are renumbered from 1 so gaps or duplicates from the model do
/// not leak into the stored story.
pub fn parse_story_content(raw: &str) -> Result<StoryContent, String> {
    let mut content: StoryContent =
        serde_json::from_str(raw).map_err(|e| format!("story JSON is malformed: {e}"))?;

    if content.title.trim().is_empty() || content.story_text.trim().is_empty() {
        return Err("story JSON is missing a title or text".to_string());
    }

    for (index, scene) in content.scenes.iter_mut().enumerate() {
        scene.scene_number = index as i32 + 1;
    }

    Ok(content)
}

pub fn fallback_story(child_name: &str, fear_or_challenge: &str) -> StoryContent {
    StoryContent {
        title: format!("{child_name}'s Brave Day"),
        story_text: format!(
            "Once upon a time, {child_name} faced a challenge with {fear_or_challenge}. \
             With courage and support from loved ones, {child_name} discovered inner strength \
             and overcame the fear. The end."
        ),
        scenes: vec![Scene {
            scene_number: 1,
            description: format!("{child_name} encounters the challenge"),
            characters_present: vec![child_name.to_string()],
            image_prompt: Some(format!("A young child named {child_name} looking thoughtful")),
            mood: None,
        }],
        key_message: Some("You are braver than you think".to_string()),
    }
}

fn character_reference_guide(profiles: &[CharacterProfile]) -> String {
    let references: Vec<String> = profiles
        .iter()
        .map(|p| format!("[{} REFERENCE: {}]", p.name, p.visual_description))
        .collect();
    format!("CHARACTER CONSISTENCY GUIDE:\n{}", references.join("\n"))
}

/// Illustration prompt that pins every character's appearance.
pub fn build_image_prompt(scene: &Scene, profiles: &[CharacterProfile], child_name: &str) -> String {
    let present: Vec<&str> = if scene.characters_present.is_empty() {
        vec![child_name]
    } else {
        scene.characters_present.iter().map(String::as_str).collect()
    };

    let details: Vec<String> = present
        .iter()
        .filter_map(|name| profiles.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
        .map(|p| format!("{}: {}", p.name, p.visual_description))
        .collect();

    let description = if scene.description.trim().is_empty() {
        "A moment in the story"
    } else {
        scene.description.as_str()
    };

    format!(
        r#"Children's book illustration in warm, friendly cartoon style:

SCENE: {description}

CHARACTER APPEARANCES (MAINTAIN EXACT CONSISTENCY):
{details}

{guide}

STYLE REQUIREMENTS:
- Digital illustration in the style of modern children's picture books
- Soft, warm color palette with gentle gradients
- Characters should have friendly, expressive faces
- Background should be detailed but not distracting
- Lighting: bright and welcoming
- Mood: {mood}
- Perspective: eye-level with the child character
- Ensure all characters match their descriptions EXACTLY

IMPORTANT: This is scene {number} of a series. Maintain absolute character consistency."#,
        details = details.join("\n"),
        guide = character_reference_guide(profiles),
        mood = scene.mood.as_deref().unwrap_or("positive and encouraging"),
        number = scene.scene_number,
    )
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Minutes at 200 words per minute, never less than one.
pub fn reading_time(words: usize) -> usize {
    (words / WORDS_PER_MINUTE).max(1)
}

struct GeneratedText {
    content: StoryContent,
    model_used: Option<String>,
    generation_time: f64,
    prompt_tokens: i32,
    completion_tokens: i32,
}

async fn generate_text(
    openai: Option<&OpenAiClient>,
    details: &SunshineDetails,
    prompt: &str,
    fear_or_challenge: &str,
) -> GeneratedText {
    let fallback = || GeneratedText {
        content: fallback_story(&details.sunshine.name, fear_or_challenge),
        model_used: None,
        generation_time: 0.0,
        prompt_tokens: 0,
        completion_tokens: 0,
    };

    let Some(openai) = openai else {
        tracing::warn!("OpenAI is not configured, using fallback story");
        return fallback();
    };

    let started = Instant::now();
    let completion = match openai.chat_json(SYSTEM_PROMPT, prompt, 0.7, 2000).await {
        Ok(completion) => completion,
        Err(e) => {
            tracing::error!("Story generation failed, using fallback: {}", e);
            return fallback();
        }
    };

    match parse_story_content(&completion.content) {
        Ok(content) => GeneratedText {
            content,
            model_used: Some(completion.model),
            generation_time: started.elapsed().as_secs_f64(),
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
        },
        Err(e) => {
            tracing::error!("Unusable story from model, using fallback: {}", e);
            fallback()
        }
    }
}

async fn illustrate(
    openai: Option<&OpenAiClient>,
    scenes: &[Scene],
    profiles: &[CharacterProfile],
    child_name: &str,
) -> Vec<String> {
    let Some(openai) = openai else {
        return Vec::new();
    };

    let mut urls = Vec::with_capacity(scenes.len());
    for scene in scenes {
        let prompt = build_image_prompt(scene, profiles, child_name);
        match openai.generate_image(&prompt).await {
            Ok(url) => urls.push(url),
            Err(e) => {
                tracing::error!(
                    "Image generation failed for scene {}: {}",
                    scene.scene_number,
                    e
                );
                urls.push(PLACEHOLDER_IMAGE_URL.to_string());
            }
        }
    }
    urls
}

/// Generate, illustrate and store a story for one of the user's profiles.
///
/// # Errors
///
/// - `SunshineNotFound`: profile missing or owned by someone else
/// - `PaymentRequired`: quota exhausted, billing problem, or a language
///   other than English without the multi-language feature
pub async fn generate_story(
    state: &AppState,
    user_id: Uuid,
    request: GenerateStoryRequest,
) -> Result<StoryGenerationResponse, AppError> {
    let pool = &state.pool;

    let details = super::sunshine_service::get_sunshine_details(pool, user_id, request.sunshine_id).await?;

    // Decided again under the row lock in `record_story_generation`
    let subscription = usage_service::get_subscription(pool, user_id).await?;
    if let UsageDecision::Denied(reason) = usage_service::can_generate_story(&subscription) {
        return Err(AppError::PaymentRequired(reason));
    }
    let language = if request.is_english() {
        None
    } else {
        usage_service::validate_feature(&subscription, Feature::MultiLanguage)?;
        Some(request.language.trim())
    };

    let profiles = build_character_profiles(&details, request.include_family);
    let prompt = build_story_prompt(
        &details,
        &profiles,
        &StoryPromptInput {
            fear_or_challenge: &request.fear_or_challenge,
            tone: request.tone,
            include_comfort_items: request.include_comfort_items,
            custom_elements: &request.custom_elements,
            language,
        },
    );

    let openai = OpenAiClient::from_config(&state.http, &state.config);
    let generated = generate_text(openai.as_ref(), &details, &prompt, &request.fear_or_challenge).await;

    let image_urls = if subscription.has_feature(Feature::ImageGeneration) {
        illustrate(
            openai.as_ref(),
            &generated.content.scenes,
            &profiles,
            &details.sunshine.name,
        )
        .await
    } else {
        Vec::new()
    };

    let words = word_count(&generated.content.story_text);
    let minutes = reading_time(words);

    let favorite_items: Vec<String> = if request.include_comfort_items {
        details.comfort_items.iter().map(|c| c.name.clone()).collect()
    } else {
        Vec::new()
    };
    let family: BTreeMap<String, String> = if request.include_family {
        details
            .family_members
            .iter()
            .map(|m| (m.name.clone(), m.relation_type.clone()))
            .collect()
    } else {
        BTreeMap::new()
    };

    let mut tx = pool.begin().await?;

    let (usage_type, subscription) =
        usage_service::record_story_generation(&mut *tx, user_id).await?;

    let story = sqlx::query_as::<_, Story>(
        r#"
        INSERT INTO stories (
            user_id, sunshine_id, title, story_text, tone, child_name, age,
            fear_or_challenge, favorite_items, family_members, scenes, image_urls,
            reading_time, word_count, model_used, generation_time,
            prompt_tokens, completion_tokens
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(details.sunshine.id)
    .bind(&generated.content.title)
    .bind(&generated.content.story_text)
    .bind(request.tone.as_str())
    .bind(&details.sunshine.name)
    .bind(details.sunshine.age())
    .bind(&request.fear_or_challenge)
    .bind(Json(&favorite_items))
    .bind(Json(&family))
    .bind(Json(&generated.content.scenes))
    .bind(Json(&image_urls))
    .bind(minutes as i32)
    .bind(words as i32)
    .bind(&generated.model_used)
    .bind(generated.generation_time)
    .bind(generated.prompt_tokens)
    .bind(generated.completion_tokens)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        "Generated story {} for sunshine {} ({})",
        story.id,
        details.sunshine.id,
        usage_type.as_str()
    );

    Ok(StoryGenerationResponse {
        story_id: story.id,
        title: story.title,
        story_text: story.story_text,
        scenes: story.scenes.0,
        image_urls: story.image_urls.0,
        reading_time: story.reading_time,
        word_count: words as i32,
        usage_type: usage_type.as_str().to_string(),
        credits_remaining: Some(usage_service::stories_remaining(&subscription)),
    })
}

/// Newest-first page of the user's stories.
pub async fn story_history(
    pool: &DbPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<StoryHistoryItem>, AppError> {
    let items = sqlx::query_as::<_, StoryHistoryItem>(
        r#"
        SELECT id, title, child_name, created_at, word_count, reading_time
        FROM stories
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(limit.clamp(1, 100))
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;

    Ok(items)
}

/// Fetch a story and count the read.
pub async fn read_story(pool: &DbPool, user_id: Uuid, story_id: Uuid) -> Result<Story, AppError> {
    sqlx::query_as::<_, Story>(
        r#"
        UPDATE stories
        SET read_count = read_count + 1,
            last_read_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(story_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::StoryNotFound)
}

/// Flip `is_favorite` and return the new value.
pub async fn toggle_favorite(pool: &DbPool, user_id: Uuid, story_id: Uuid) -> Result<bool, AppError> {
    sqlx::query_scalar::<_, bool>(
        r#"
        UPDATE stories
        SET is_favorite = NOT is_favorite,
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING is_favorite
        "#,
    )
    .bind(story_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::StoryNotFound)
}

pub async fn rate_story(pool: &DbPool, user_id: Uuid, story_id: Uuid, rating: f32) -> Result<f32, AppError> {
    sqlx::query_scalar::<_, f32>(
        r#"
        UPDATE stories
        SET rating = $3,
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING rating
        "#,
    )
    .bind(story_id)
    .bind(user_id)
    .bind(rating)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::StoryNotFound)
}

pub async fn delete_story(pool: &DbPool, user_id: Uuid, story_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM stories WHERE id = $1 AND user_id = $2")
        .bind(story_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::StoryNotFound);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sunshine::fixtures;

    #[test]
    fn profiles_cap_family_at_three() {
        let mut details = fixtures::details();
        let id = details.sunshine.id;
        for (name, relation) in [("Tom", "father"), ("Ivy", "sister"), ("Gus", "grandfather")] {
            details
                .family_members
                .push(fixtures::family_member(id, name, relation));
        }

        let profiles = build_character_profiles(&details, true);
        assert_eq!(profiles.len(), 4);
        assert_eq!(profiles[0].name, "Maya");
        assert_eq!(profiles[0].personality_traits, vec!["brave".to_string()]);
        assert_eq!(profiles[1].role_in_story, "supportive mother who helps Maya");
        assert!(profiles.iter().all(|p| p.name != "Gus"));

        assert_eq!(build_character_profiles(&details, false).len(), 1);
    }

    #[test]
    fn prompt_carries_tone_favorites_and_language() {
        let mut details = fixtures::details();
        let id = details.sunshine.id;
        details.comfort_items.push(fixtures::comfort_item(id, "Blue Blanket"));
        details.comfort_items.push(fixtures::comfort_item(id, "Night Light"));
        let profiles = build_character_profiles(&details, true);
        let custom = vec!["a rainbow umbrella".to_string()];

        let prompt = build_story_prompt(
            &details,
            &profiles,
            &StoryPromptInput {
                fear_or_challenge: "thunderstorms",
                tone: StoryTone::Calm,
                include_comfort_items: true,
                custom_elements: &custom,
                language: Some("Spanish"),
            },
        );

        assert!(prompt.contains(r#"help overcome: "thunderstorms""#));
        assert!(prompt.contains("gentle, soothing, and reassuring with soft transitions"));
        assert!(prompt.contains("Comfort items/favorites: Mr. Hoot, Blue Blanket, a rainbow umbrella"));
        assert!(!prompt.contains("Night Light"));
        assert!(prompt.contains("- Rosa (mother): A caring mother Personality: patient"));
        assert!(prompt.contains("Write the entire story in Spanish"));
    }

    #[test]
    fn parsed_scenes_are_renumbered() {
        let raw = r#"{
            "title": "Maya and the Storm",
            "story_text": "Thunder rolled. Maya held Mr. Hoot.",
            "scenes": [
                {"scene_number": 4, "description": "Clouds gather"},
                {"scene_number": 4, "description": "Maya smiles", "characters_present": ["Maya"]}
            ],
            "key_message": "Storms pass"
        }"#;

        let content = parse_story_content(raw).unwrap();
        let numbers: Vec<i32> = content.scenes.iter().map(|s| s.scene_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(content.key_message.as_deref(), Some("Storms pass"));
    }

    #[test]
    fn unusable_model_output_is_rejected() {
        assert!(parse_story_content("not json").is_err());
        assert!(parse_story_content(r#"{"title":"","story_text":"x"}"#).is_err());
    }

    #[test]
    fn fallback_story_names_the_child() {
        let story = fallback_story("Leo", "the dark");

        assert_eq!(story.title, "Leo's Brave Day");
        assert!(story.story_text.contains("Leo faced a challenge with the dark"));
        assert_eq!(story.scenes.len(), 1);
        assert_eq!(story.scenes[0].characters_present, vec!["Leo".to_string()]);
    }

    #[test]
    fn image_prompt_describes_present_characters_only() {
        let details = fixtures::details();
        let profiles = build_character_profiles(&details, true);
        let scene = Scene {
            scene_number: 2,
            description: "Maya hugs her mom".to_string(),
            characters_present: vec!["maya".to_string()],
            image_prompt: None,
            mood: Some("warm".to_string()),
        };

        let prompt = build_image_prompt(&scene, &profiles, "Maya");
        assert!(prompt.contains("SCENE: Maya hugs her mom"));
        assert!(prompt.contains("Maya: A cheerful"));
        assert!(!prompt.contains("Rosa: A caring mother"));
        assert!(prompt.contains("[Rosa REFERENCE: A caring mother]"));
        assert!(prompt.contains("Mood: warm"));
        assert!(prompt.contains("This is scene 2 of a series"));
    }

    #[test]
    fn reading_time_is_at_least_one_minute() {
        assert_eq!(word_count("  Once upon\n a   time "), 4);
        assert_eq!(reading_time(0), 1);
        assert_eq!(reading_time(199), 1);
        assert_eq!(reading_time(450), 2);
        assert_eq!(reading_time(1000), 5);
    }

    mod db {
        use super::*;
        use crate::{config::Config, db::fixtures};

        fn state(pool: DbPool) -> AppState {
            AppState::new(pool, Config::for_tests()).unwrap()
        }

        fn request(sunshine_id: Uuid) -> GenerateStoryRequest {
            serde_json::from_value(serde_json::json!({
                "sunshine_id": sunshine_id,
                "fear_or_challenge": "the dark",
            }))
            .unwrap()
        }

        async fn story_count(pool: &DbPool, user_id: Uuid) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM stories WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(pool)
                .await
                .unwrap()
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn generation_stores_story_and_usage_together(pool: DbPool) {
            let user_id = fixtures::user(&pool, "parent@example.com").await;
            let sunshine_id = fixtures::sunshine(&pool, user_id, "Mia").await;

            let response = generate_story(&state(pool.clone()), user_id, request(sunshine_id))
                .await
                .unwrap();
            assert_eq!(response.usage_type, "free_tier");
            assert_eq!(response.credits_remaining, Some(2));

            let subscription = usage_service::get_subscription(&pool, user_id).await.unwrap();
            assert_eq!(subscription.stories_created_this_month, 1);
            assert_eq!(story_count(&pool, user_id).await, 1);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn denied_generation_stores_nothing(pool: DbPool) {
            let user_id = fixtures::user(&pool, "parent@example.com").await;
            let sunshine_id = fixtures::sunshine(&pool, user_id, "Mia").await;
            fixtures::set_usage(&pool, user_id, 3, 0).await;

            assert!(matches!(
                generate_story(&state(pool.clone()), user_id, request(sunshine_id)).await,
                Err(AppError::PaymentRequired(_))
            ));

            let subscription = usage_service::get_subscription(&pool, user_id).await.unwrap();
            assert_eq!(subscription.stories_created_this_month, 3);
            assert_eq!(story_count(&pool, user_id).await, 0);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn concurrent_generations_spend_the_last_credit_once(pool: DbPool) {
            let user_id = fixtures::user(&pool, "parent@example.com").await;
            let sunshine_id = fixtures::sunshine(&pool, user_id, "Mia").await;
            fixtures::set_usage(&pool, user_id, 3, 1).await;

            let state = state(pool.clone());
            let tasks: Vec<_> = (0..4)
                .map(|_| {
                    let state = state.clone();
                    tokio::spawn(async move { generate_story(&state, user_id, request(sunshine_id)).await })
                })
                .collect();

            let mut succeeded = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(response) => {
                        assert_eq!(response.usage_type, "individual_credit");
                        succeeded += 1;
                    }
                    Err(e) => assert!(matches!(e, AppError::PaymentRequired(_)), "{e:?}"),
                }
            }
            assert_eq!(succeeded, 1);

            let subscription = usage_service::get_subscription(&pool, user_id).await.unwrap();
            assert_eq!(subscription.individual_story_credits, 0);
            assert_eq!(subscription.stories_created_this_month, 3);
            assert_eq!(story_count(&pool, user_id).await, 1);
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn reading_counts_and_stays_private(pool: DbPool) {
            let owner = fixtures::user(&pool, "owner@example.com").await;
            let other = fixtures::user(&pool, "other@example.com").await;
            let sunshine_id = fixtures::sunshine(&pool, owner, "Mia").await;
            let story_id = generate_story(&state(pool.clone()), owner, request(sunshine_id))
                .await
                .unwrap()
                .story_id;

            assert_eq!(read_story(&pool, owner, story_id).await.unwrap().read_count, 1);
            let story = read_story(&pool, owner, story_id).await.unwrap();
            assert_eq!(story.read_count, 2);
            assert!(story.last_read_at.is_some());

            assert!(matches!(read_story(&pool, other, story_id).await, Err(AppError::StoryNotFound)));
            assert!(matches!(toggle_favorite(&pool, other, story_id).await, Err(AppError::StoryNotFound)));
            assert!(matches!(rate_story(&pool, other, story_id, 4.0).await, Err(AppError::StoryNotFound)));
            assert!(matches!(delete_story(&pool, other, story_id).await, Err(AppError::StoryNotFound)));

            assert!(toggle_favorite(&pool, owner, story_id).await.unwrap());
            delete_story(&pool, owner, story_id).await.unwrap();
            assert!(matches!(read_story(&pool, owner, story_id).await, Err(AppError::StoryNotFound)));
        }

        #[sqlx::test(migrations = "./migrations")]
        async fn foreign_profile_cannot_be_used(pool: DbPool) {
            let owner = fixtures::user(&pool, "owner@example.com").await;
            let other = fixtures::user(&pool, "other@example.com").await;
            let sunshine_id = fixtures::sunshine(&pool, owner, "Mia").await;

            assert!(matches!(
                generate_story(&state(pool.clone()), other, request(sunshine_id)).await,
                Err(AppError::SunshineNotFound)
            ));
            let subscription = usage_service::get_subscription(&pool, other).await.unwrap();
            assert_eq!(subscription.stories_created_this_month, 0);
        }
    }
}
