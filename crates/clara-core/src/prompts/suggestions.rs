use crate::context::AggregatedContext;

/// System prompt for live suggestion generation. The reply contract (a JSON object
/// with a `suggestions` array) is what `pipeline::parse` expects.
pub const SUGGESTION_SYSTEM: &str = "You are a clinical decision-support assistant listening to a live \
consultation between a doctor and a patient. Suggest the most useful next questions, checks or \
considerations for the doctor. Be concise and clinically specific. Never address the patient directly.\n\n\
Reply with a single JSON object and nothing else:\n\
{\"suggestions\": [{\"content\": \"...\", \"type\": \"question|diagnosis|treatment|safety|clinical\", \
\"urgency\": \"low|medium|high\", \"confidence\": 0.0-1.0}]}\n\
Return an empty array when there is nothing useful to add.";

/// Assemble the user prompt. Section order is fixed: conversation, reference
/// knowledge, patient background, protocol. Empty sections are left out entirely.
pub fn build_suggestion_prompt(ctx: &AggregatedContext) -> String {
    let mut sections = Vec::with_capacity(4);
    sections.push(format!("## Recent conversation\n{}", ctx.conversation));

    if !ctx.knowledge.is_empty() {
        let refs = ctx
            .knowledge
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("[{}] {} (relevance {:.2})\n{}", i + 1, hit.document_name, hit.score, hit.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        sections.push(format!("## Reference guidelines\n{}", refs));
    }

    if let Some(ref patient) = ctx.patient {
        let rendered = patient.format_for_prompt();
        if !rendered.is_empty() {
            sections.push(format!("## Patient background\n{}", rendered));
        }
    }

    if let Some(ref skill) = ctx.skill {
        sections.push(format!("## Protocol: {}\n{}", skill.name, skill.content));
    }

    sections.join("\n\n")
}
