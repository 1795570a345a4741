//! Text and JSON rendering of command results.

use colored::Colorize;
use serde::Serialize;
use typesniff_core::{DetectedTestObjectType, SkippedType, TestObjectType};

#[derive(Serialize)]
struct DetectionReport<'a> {
    target: &'a str,
    detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    type_label: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_uri: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<i32>,
}

impl<'a> DetectionReport<'a> {
    fn new(target: &'a str, detected: Option<&'a DetectedTestObjectType>) -> Self {
        Self {
            target,
            detected: detected.is_some(),
            id: detected.map(|d| d.id().as_str()),
            type_label: detected.map(|d| d.object_type().label.as_str()),
            label: detected.map(DetectedTestObjectType::label),
            description: detected.and_then(DetectedTestObjectType::description),
            resource_uri: detected.map(|d| d.resource_uri().as_str()),
            priority: detected.map(DetectedTestObjectType::priority),
        }
    }
}

pub fn print_detection_text(target: &str, detected: Option<&DetectedTestObjectType>) {
    let Some(detected) = detected else {
        println!("{} {}", "No test object type detected for".yellow(), target);
        return;
    };

    println!(
        "{} {} ({})",
        "Detected:".green().bold(),
        detected.id().as_str().bold(),
        detected.object_type().label
    );
    println!("  {:<12} {}", "Label:", detected.label());
    if let Some(description) = detected.description() {
        println!("  {:<12} {}", "Description:", description);
    }
    println!("  {:<12} {}", "Resource:", detected.resource_uri());
}

pub fn print_detection_json(
    target: &str,
    detected: Option<&DetectedTestObjectType>,
) -> anyhow::Result<()> {
    let report = DetectionReport::new(target, detected);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[derive(Serialize)]
struct TypeEntry<'a> {
    id: &'a str,
    label: &'a str,
    priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct SkippedEntry<'a> {
    id: &'a str,
    error: String,
}

#[derive(Serialize)]
struct TypesReport<'a> {
    types: Vec<TypeEntry<'a>>,
    skipped: Vec<SkippedEntry<'a>>,
}

pub fn print_types_text(types: &[&TestObjectType], skipped: &[SkippedType]) {
    for object_type in types {
        println!(
            "{:>5}  {:<32} {}",
            object_type.priority,
            object_type.id.as_str().bold(),
            object_type.label
        );
    }
    if !skipped.is_empty() {
        println!();
        println!("{}", "Skipped (expression does not compile):".yellow().bold());
        for skipped in skipped {
            println!("  {}: {}", skipped.id, skipped.error);
        }
    }
}

pub fn print_types_json(types: &[&TestObjectType], skipped: &[SkippedType]) -> anyhow::Result<()> {
    let report = TypesReport {
        types: types
            .iter()
            .map(|t| TypeEntry {
                id: t.id.as_str(),
                label: &t.label,
                priority: t.priority,
                description: t.description.as_deref(),
            })
            .collect(),
        skipped: skipped
            .iter()
            .map(|s| SkippedEntry {
                id: s.id.as_str(),
                error: s.error.to_string(),
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
