//! /model command - list and switch models

use super::CommandResult;
use crate::utils::format_size;
use mate_ai::ModelTag;

pub struct ModelCommand;

impl ModelCommand {
    /// Execute /model command - shows the current model if no args, otherwise switches
    pub fn execute(args: &str, current_model: &str) -> CommandResult {
        if args.is_empty() {
            CommandResult::Message(format!(
                "Current model: {}\nSwitch with: /model <name>, list with: /models",
                current_model
            ))
        } else {
            CommandResult::ChangeModel(args.to_string())
        }
    }

    /// List models as text
    pub fn list_models_text(current_model: &str, models: &[ModelTag]) -> String {
        if models.is_empty() {
            return "No models installed on the server".to_string();
        }

        let mut output = String::from("Available models:\n");
        for model in models {
            let marker = if model.name == current_model { " *" } else { "" };
            let params = model
                .details
                .as_ref()
                .map(|d| d.parameter_size.as_str())
                .filter(|p| !p.is_empty())
                .map(|p| format!(", {}", p))
                .unwrap_or_default();
            output.push_str(&format!(
                "  {}{} ({}{})\n",
                model.name,
                marker,
                format_size(model.size),
                params
            ));
        }

        output.push_str("\nSwitch with: /model <name>");
        output
    }

    /// Resolve a query against installed models: exact name, then name without
    /// tag, then substring
    pub fn find<'a>(query: &str, models: &'a [ModelTag]) -> Option<&'a ModelTag> {
        let query_lower = query.to_lowercase();
        let name_of = |m: &ModelTag| m.name.to_lowercase();

        models
            .iter()
            .find(|m| name_of(m) == query_lower)
            .or_else(|| {
                models
                    .iter()
                    .find(|m| name_of(m).split(':').next() == Some(query_lower.as_str()))
            })
            .or_else(|| models.iter().find(|m| name_of(m).contains(&query_lower)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, size: u64) -> ModelTag {
        ModelTag {
            name: name.to_string(),
            size,
            digest: String::new(),
            details: None,
        }
    }

    #[test]
    fn test_list_marks_current() {
        let models = vec![tag("mistral:latest", 4_109_865_159), tag("llama3:8b", 512)];
        let text = ModelCommand::list_models_text("llama3:8b", &models);
        assert!(text.contains("mistral:latest (3.8 GB)"));
        assert!(text.contains("llama3:8b * (512 B)"));
    }

    #[test]
    fn test_find_prefers_exact_then_base_name() {
        let models = vec![tag("codellama:7b", 1), tag("llama3:latest", 1), tag("llama3", 1)];
        assert_eq!(ModelCommand::find("llama3", &models).unwrap().name, "llama3");
        assert_eq!(
            ModelCommand::find("codellama", &models).unwrap().name,
            "codellama:7b"
        );
        assert_eq!(ModelCommand::find("code", &models).unwrap().name, "codellama:7b");
        assert!(ModelCommand::find("qwen", &models).is_none());
    }

    #[test]
    fn test_execute() {
        assert_eq!(
            ModelCommand::execute("llama3", "mistral"),
            CommandResult::ChangeModel("llama3".into())
        );
        assert!(matches!(
            ModelCommand::execute("", "mistral"),
            CommandResult::Message(m) if m.contains("Current model: mistral")
        ));
    }
}
