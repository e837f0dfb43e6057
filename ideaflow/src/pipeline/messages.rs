//! Localised user-facing failure messages.

use super::stage::StageName;
use crate::errors::FailureKind;

/// Languages with translated messages.
pub const SUPPORTED_LANGUAGES: [&str; 5] = ["en", "es", "fr", "de", "pt"];

/// Maps a language tag such as `pt-BR` to a supported code, defaulting to
/// English.
#[must_use]
pub fn normalize_language(tag: &str) -> &'static str {
    let primary = tag
        .split(|c: char| c == '-' || c == '_')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    SUPPORTED_LANGUAGES
        .iter()
        .copied()
        .find(|code| *code == primary)
        .unwrap_or("en")
}

/// English name of a language, used inside prompts.
#[must_use]
pub fn language_name(tag: &str) -> &'static str {
    match normalize_language(tag) {
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "pt" => "Portuguese",
        _ => "English",
    }
}

/// Localised display name of a stage.
#[must_use]
pub fn stage_label(stage: StageName, language: &str) -> &'static str {
    use StageName::{BusinessStrategy, IdeaAnalysis, RequirementsPlanning, TechnicalDesign, Validation};
    match (normalize_language(language), stage) {
        ("es", IdeaAnalysis) => "Análisis de la idea",
        ("es", RequirementsPlanning) => "Planificación de requisitos",
        ("es", TechnicalDesign) => "Diseño técnico",
        ("es", BusinessStrategy) => "Estrategia de negocio",
        ("es", Validation) => "Validación",
        ("fr", IdeaAnalysis) => "Analyse de l'idée",
        ("fr", RequirementsPlanning) => "Planification des exigences",
        ("fr", TechnicalDesign) => "Conception technique",
        ("fr", BusinessStrategy) => "Stratégie commerciale",
        ("fr", Validation) => "Validation",
        ("de", IdeaAnalysis) => "Ideenanalyse",
        ("de", RequirementsPlanning) => "Anforderungsplanung",
        ("de", TechnicalDesign) => "Technisches Design",
        ("de", BusinessStrategy) => "Geschäftsstrategie",
        ("de", Validation) => "Validierung",
        ("pt", IdeaAnalysis) => "Análise da ideia",
        ("pt", RequirementsPlanning) => "Planejamento de requisitos",
        ("pt", TechnicalDesign) => "Design técnico",
        ("pt", BusinessStrategy) => "Estratégia de negócio",
        ("pt", Validation) => "Validação",
        (_, IdeaAnalysis) => "Idea analysis",
        (_, RequirementsPlanning) => "Requirements planning",
        (_, TechnicalDesign) => "Technical design",
        (_, BusinessStrategy) => "Business strategy",
        (_, Validation) => "Validation",
    }
}

/// Localised explanation of a failure kind.
#[must_use]
pub fn failure_text(kind: FailureKind, language: &str) -> &'static str {
    use FailureKind::{
        Configuration, Internal, MalformedOutput, Network, RateLimited, ServiceUnavailable, Timeout,
    };
    match (normalize_language(language), kind) {
        ("es", Configuration) => "Falta la configuración del servicio de IA.",
        ("es", Network) => "No se pudo conectar con el servicio de IA.",
        ("es", RateLimited) => "El servicio de IA está limitando las solicitudes. Inténtalo más tarde.",
        ("es", ServiceUnavailable) => "El servicio de IA no está disponible en este momento.",
        ("es", Timeout) => "El servicio de IA tardó demasiado en responder.",
        ("es", MalformedOutput) => "El servicio de IA devolvió una respuesta no válida.",
        ("es", Internal) => "Se produjo un error inesperado.",
        ("fr", Configuration) => "La configuration du service d'IA est manquante.",
        ("fr", Network) => "Impossible de joindre le service d'IA.",
        ("fr", RateLimited) => "Le service d'IA limite les requêtes. Réessayez plus tard.",
        ("fr", ServiceUnavailable) => "Le service d'IA est actuellement indisponible.",
        ("fr", Timeout) => "Le service d'IA a mis trop de temps à répondre.",
        ("fr", MalformedOutput) => "Le service d'IA a renvoyé une réponse invalide.",
        ("fr", Internal) => "Une erreur inattendue s'est produite.",
        ("de", Configuration) => "Die Konfiguration des KI-Dienstes fehlt.",
        ("de", Network) => "Der KI-Dienst ist nicht erreichbar.",
        ("de", RateLimited) => "Der KI-Dienst drosselt Anfragen. Bitte später erneut versuchen.",
        ("de", ServiceUnavailable) => "Der KI-Dienst ist derzeit nicht verfügbar.",
        ("de", Timeout) => "Der KI-Dienst hat zu lange für die Antwort gebraucht.",
        ("de", MalformedOutput) => "Der KI-Dienst hat eine ungültige Antwort geliefert.",
        ("de", Internal) => "Ein unerwarteter Fehler ist aufgetreten.",
        ("pt", Configuration) => "A configuração do serviço de IA está ausente.",
        ("pt", Network) => "Não foi possível conectar ao serviço de IA.",
        ("pt", RateLimited) => "O serviço de IA está limitando as solicitações. Tente mais tarde.",
        ("pt", ServiceUnavailable) => "O serviço de IA está indisponível no momento.",
        ("pt", Timeout) => "O serviço de IA demorou demais para responder.",
        ("pt", MalformedOutput) => "O serviço de IA retornou uma resposta inválida.",
        ("pt", Internal) => "Ocorreu um erro inesperado.",
        (_, Configuration) => "The AI service is not configured.",
        (_, Network) => "Could not reach the AI service.",
        (_, RateLimited) => "The AI service is rate limiting requests. Please try again later.",
        (_, ServiceUnavailable) => "The AI service is currently unavailable.",
        (_, Timeout) => "The AI service took too long to respond.",
        (_, MalformedOutput) => "The AI service returned an unusable response.",
        (_, Internal) => "An unexpected error occurred.",
    }
}

/// The message attached to a failed stage: `"<stage label>: <explanation>"`.
#[must_use]
pub fn stage_failure_message(stage: StageName, kind: FailureKind, language: &str) -> String {
    format!("{}: {}", stage_label(stage, language), failure_text(kind, language))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("pt-BR"), "pt");
        assert_eq!(normalize_language("DE"), "de");
        assert_eq!(normalize_language("es_MX"), "es");
        assert_eq!(normalize_language("ja"), "en");
        assert_eq!(normalize_language(""), "en");
        assert_eq!(language_name("fr-CA"), "French");
    }

    #[test]
    fn test_stage_failure_message() {
        assert_eq!(
            stage_failure_message(StageName::TechnicalDesign, FailureKind::Timeout, "en"),
            "Technical design: The AI service took too long to respond."
        );
        assert_eq!(
            stage_failure_message(StageName::Validation, FailureKind::Network, "de"),
            "Validierung: Der KI-Dienst ist nicht erreichbar."
        );
        assert!(
            stage_failure_message(StageName::IdeaAnalysis, FailureKind::Internal, "xx")
                .starts_with("Idea analysis")
        );
    }

    #[test]
    fn test_every_language_translates_every_kind() {
        let kinds = [
            FailureKind::Configuration,
            FailureKind::Network,
            FailureKind::RateLimited,
            FailureKind::ServiceUnavailable,
            FailureKind::Timeout,
            FailureKind::MalformedOutput,
            FailureKind::Internal,
        ];
        for language in SUPPORTED_LANGUAGES.iter().filter(|l| **l != "en") {
            for kind in kinds {
                assert_ne!(failure_text(kind, language), failure_text(kind, "en"), "{language} {kind}");
            }
        }
    }
}
