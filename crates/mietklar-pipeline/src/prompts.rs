//! Prompt templates for the analysis stages.
//!
//! All user-facing model output is German; the prompts are therefore written
//! in German. Each stage owns exactly one template.

use serde_json::Value as JsonValue;

use mietklar_core::detail_schema_description;

/// Verbatim transcription prompt for the text extraction stage.
///
/// The model must reproduce visible characters exactly, with no
/// interpretation, translation, or summarization.
pub const TEXT_EXTRACTION_PROMPT: &str = "\
Sie sind ein präzises Texterkennungssystem. Ihre Aufgabe ist es, den \
sichtbaren Text der bereitgestellten Vertragsseiten Zeichen für Zeichen \
wiederzugeben.

**Anforderungen:**

1. Geben Sie ausschließlich den sichtbaren Text wieder, ohne Interpretation.
2. Übersetzen Sie nichts und fassen Sie nichts zusammen.
3. Erhalten Sie die Absatzstruktur des Originals; trennen Sie Absätze durch \
eine Leerzeile.
4. Geben Sie auch handschriftliche Anmerkungen wieder, soweit lesbar.
5. Fahren Sie fort, bis jede Seite vollständig erfasst ist.";

/// System prompt for the paragraph simplification stage.
pub const SIMPLIFICATION_PROMPT: &str = "\
Es liegt ein Mietvertrag vor. Dieser enthält Paragraphen, die mit § oder \
einer entsprechenden Überschrift gekennzeichnet sind. Nur diese Paragraphen \
sollen vereinfacht werden. Teile des Textes ohne Paragraphen-Bezug werden \
ignoriert.

Sämtliche persönlichen Daten wie Namen, Adressen, IBAN, Telefonnummern oder \
E-Mail-Adressen sind zu entfernen.

Die Zusammenfassung erfolgt ausschließlich in deutscher Sprache. \
Rechtsbegriffe sollen in kurzen Sätzen und ohne komplizierten Fachjargon \
erklärt werden. Dabei bleiben die rechtlich relevanten Informationen \
erhalten.

Es finden keine wörtlichen Zitate aus dem Originalvertrag statt. Diese \
Zusammenfassung ist nur eine verständliche Darstellung und keine \
Rechtsberatung.

Die Ausgabe erfolgt als JSON-Array. Jeder Eintrag enthält:
[
  {
    \"title\": \"Kurze Überschrift zu §1 oder ähnlichem\",
    \"simplified\": \"Kurze Erläuterung zum Inhalt dieses Paragraphen\"
  }
]

\"title\" ist eine Ein- oder Zwei-Wort-Beschreibung des Absatzes oder \
Paragraphen.
\"simplified\" ist die vereinfachte Fassung des jeweiligen Paragraphen-Textes.";

/// System prompt for the neighborhood narration stage, parameterized on the
/// property address.
pub fn neighborhood_prompt(address: &str) -> String {
    format!(
        "\
Sie sind ein Immobilienexperte und analysieren die Umgebung einer Immobilie.
Ihre Aufgabe ist es, eine kurze Analyse der Umgebung basierend auf dem \
bereitgestellten Kartenbild zu liefern.

Wenn Sie spezifische Merkmale oder Wahrzeichen in der Umgebung sehen, \
beschreiben Sie diese bitte im Detail.

**Anforderungen:**

1. Beschreiben Sie die Umgebung basierend auf dem bereitgestellten Kartenbild.
2. Erwähnen Sie spezifische Merkmale oder Wahrzeichen, die Sie sehen.
3. Bieten Sie eine kurze Analyse darüber, wie diese Merkmale die Immobilie \
oder ihre Bewohner beeinflussen könnten.
4. Geben Sie keine persönlichen Meinungen oder Vorurteile ab.
5. Geben Sie keine rechtlichen Ratschläge oder Analysen.
6. Antworten Sie in vollständigen Sätzen und verwenden Sie korrekte \
Grammatik und Interpunktion.
7. Antworten Sie nur auf Deutsch.

**Zusätzliche Informationen:**

- Das Kartenbild zeigt die Umgebung der Immobilie, die sich befindet an: {}
- Das Bild ist eine Draufsicht auf das Gebiet und zeigt Straßen, Gebäude, \
Parks und andere Merkmale.",
        address
    )
}

/// System prompt for the structured detail extraction stage, embedding the
/// machine-readable field schema so model output maps directly onto the
/// detail record.
pub fn detail_extraction_prompt() -> String {
    let schema = JsonValue::Object(detail_schema_description());
    let schema_json =
        serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());

    format!(
        "\
Sie sind ein Vertragsanalyse-Experte. Ihre Aufgabe ist es, den Vertrag zu \
analysieren und wichtige Informationen zu extrahieren, die in einem \
JSON-Objekt organisiert werden, das *strikt* dem folgenden Schema entspricht:

{}

**Anforderungen:**

1. Geben Sie keine persönlichen Kontaktinformationen (Namen, Telefonnummern, \
E-Mails, Unterschriften) an. Geben Sie die Adresse der Immobilie (Stadt, \
Postleitzahl) an.
2. Extrahieren Sie alle Preisdetails mit Beschreibungen und Beträgen.
3. Wenn ein Abschnitt nicht vorhanden oder nicht extrahierbar ist, lassen \
Sie ihn als null oder eine leere Zeichenfolge.
4. Geben Sie keine rechtlichen Ratschläge oder Interpretationen.
5. Seien Sie bei der Extraktion so genau wie möglich.
6. Datumsangaben im Format JJJJ-MM-TT.

**Zusätzliche Informationen:**
* Der Vertrag kann Informationen über die Immobilie, Mietbedingungen, \
Kosten und andere Details enthalten.
* Der Vertrag kann auf Deutsch sein.
* Der Vertrag kann Tabellen, Listen oder andere strukturierte Daten \
enthalten.
* Der Vertrag kann handschriftliche Anmerkungen oder Text enthalten, die \
nicht ignoriert werden sollten, da sie Teil des Vertrags sind!",
        schema_json
    )
}
