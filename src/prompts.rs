use crate::model::ChatTurn;
use std::fmt::Write;

/// Recent turns carried into the Q&A prompt.
const HISTORY_TURNS: usize = 5;

/// Prompt for the one-shot summary generated at upload time.
pub fn initial_analysis_prompt(filename: &str, workbook_context: &str) -> String {
    format!(
        "Tu es un expert Excel qui analyse des fichiers pour des utilisateurs métiers.\n\
         Analyse ce fichier Excel et fournis un résumé clair et utile en français.\n\n\
         {workbook_context}\n\
         Fournis :\n\
         1. Un aperçu rapide du fichier et son utilité probable\n\
         2. Les points clés sur la structure des données\n\
         3. Les problèmes potentiels ou améliorations possibles\n\
         4. Des suggestions d'actions pour l'utilisateur\n\n\
         Sois concis, clair et utilise un langage accessible. \
         Utilise des émojis pour rendre le texte plus agréable.\n\
         Fichier : {filename}"
    )
}

/// Prompt for general questions about the workbook. The context string from
/// the context builder is the model's only view of the data.
pub fn chat_prompt(message: &str, workbook_context: &str, history: &[ChatTurn]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Tu es un expert Excel/VBA qui aide des utilisateurs métiers en français."
    );
    let _ = writeln!(out, "\n{workbook_context}");
    let _ = writeln!(
        out,
        "Tu peux analyser, expliquer, et donner des conseils sur le fichier Excel."
    );
    let _ = writeln!(
        out,
        "Utilise des émojis pour rendre la conversation agréable."
    );

    let recent = history.iter().rev().take(HISTORY_TURNS).rev();
    let mut wrote_header = false;
    for turn in recent {
        if !wrote_header {
            let _ = writeln!(out, "\nÉchanges récents :");
            wrote_header = true;
        }
        let _ = writeln!(out, "Utilisateur : {}", turn.user);
        let _ = writeln!(out, "Assistant : {}", turn.assistant);
    }

    let _ = writeln!(out, "\nMessage de l'utilisateur : {message}");
    out
}

/// Prompt for an edit-classified message. Demands exactly one JSON object and
/// nothing else; `default_sheet` is the workbook's actual first sheet so the
/// model never invents a sheet name.
pub fn edit_prompt(message: &str, default_sheet: &str) -> String {
    format!(
        "Tu es un assistant Excel. L'utilisateur veut modifier une cellule.\n\
         Réponds UNIQUEMENT avec ce format JSON, rien d'autre :\n\n\
         {{\n    \"action\": \"update_cell\",\n    \"sheet\": \"{default_sheet}\",\n    \
         \"cell\": \"[LA_CELLULE]\",\n    \"value\": \"[LA_VALEUR]\",\n    \
         \"message\": \"✅ J'ai modifié la cellule [LA_CELLULE] avec la valeur '[LA_VALEUR]'. \
         La modification est sauvegardée.\"\n}}\n\n\
         Exemples :\n\
         - \"écris 18 dans AC1\" → {{\"action\": \"update_cell\", \"sheet\": \"{default_sheet}\", \
         \"cell\": \"AC1\", \"value\": \"18\", \"message\": \"✅ J'ai écrit 18 dans la cellule AC1. \
         La modification est sauvegardée.\"}}\n\
         - \"mets 500 en B3\" → {{\"action\": \"update_cell\", \"sheet\": \"{default_sheet}\", \
         \"cell\": \"B3\", \"value\": \"500\", \"message\": \"✅ J'ai mis 500 dans la cellule B3. \
         La modification est sauvegardée.\"}}\n\n\
         Message de l'utilisateur : {message}\n\n\
         IMPORTANT : Réponds UNIQUEMENT avec le JSON, pas de texte avant ou après !"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn edit_prompt_pins_the_default_sheet() {
        let prompt = edit_prompt("écris 18 dans AC1", "Ventes 2024");
        assert!(prompt.contains("\"sheet\": \"Ventes 2024\""));
        assert!(prompt.contains("écris 18 dans AC1"));
        assert!(!prompt.contains("Feuil1"));
    }

    #[test]
    fn chat_prompt_keeps_only_recent_history() {
        let history: Vec<ChatTurn> = (0..8)
            .map(|i| ChatTurn {
                user: format!("question {i}"),
                assistant: format!("réponse {i}"),
                timestamp: Utc::now(),
            })
            .collect();
        let prompt = chat_prompt("et B3 ?", "Fichier Excel \"a.xlsx\"", &history);
        assert!(!prompt.contains("question 2"));
        assert!(prompt.contains("question 3"));
        assert!(prompt.contains("question 7"));
        assert!(prompt.ends_with("Message de l'utilisateur : et B3 ?\n"));
    }
}
