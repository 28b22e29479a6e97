//! All LLM prompt templates for the pipeline, one per stage, selected via
//! the `Stage` enum. Templates are data: `{placeholder}` slots are filled by
//! `render`, and a line whose slot has no value is dropped entirely so the
//! model never sees an empty label it could hallucinate content for.
//!
//! User free text is interpolated verbatim. Prompt-injection sanitization is
//! a known, accepted risk at this layer.

use crate::pipeline::Stage;

/// Instruction block appended to every stage prompt.
pub const JSON_ONLY_INSTRUCTION: &str = "\
Respond ONLY with valid JSON. \
Do NOT include any text outside the JSON value. \
Do NOT use markdown code fences. \
Do NOT include explanations or apologies.";

pub const SOCIO_ECONOMIC_TEMPLATE: &str = "\
Analyze the socio-economic context of this user for career guidance.
Include location constraints, financial situation, and risk capacity.

Personal info: {personal_info}
Optional fields: {optional_fields}

Return a JSON object with exactly these keys:
- location_constraints (list of strings)
- financial_analysis (short string)
- risk_capacity (one of: low, medium, high)
- restricted_career_types (list of strings)
- allowed_career_types (list of strings)
- recommendations (list of strings)";

pub const LEARNING_ROADMAP_TEMPLATE: &str = "\
Summarize the learning roadmap for {user_name}.

Learning data: {learning_data}
Strengths and weaknesses: {strengths_and_weaknesses}

Return a JSON object with exactly these keys:
- learning_gaps (list of strings)
- recommendations (list of strings)
- next_steps (list of strings)";

pub const RESUME_ANALYSIS_TEMPLATE: &str = "\
Extract skills, projects, and gaps from the resume below.
Compare against the user's claimed strengths and weaknesses.

Claimed strengths/weaknesses: {strengths_and_weaknesses}
Preferred role: {preferred_role}
Resume (possibly truncated): {resume_text}

Return a JSON object with exactly these keys:
- skills (list of strings)
- projects (list of strings)
- gaps (list of strings)
- role_alignment (short string: how well the resume supports the preferred role)
- resume_risk_factors (list of strings)";

pub const APTITUDE_INTEREST_TEMPLATE: &str = "\
Analyze the user's test scores and interests to suggest career domains.

Personal info: {personal_info}
Test scores: {tests}
Interests: {interests}

Return a JSON object with exactly these keys:
- suggested_domains (list of strings)
- conflicts (list of strings: contradictions between tests and stated interests)
- recommendations (list of strings)";

pub const CROSS_EXAM_QUESTIONS_TEMPLATE: &str = "\
You are a friendly, supportive career counselor. Generate 5-9 personalized
cross-examination questions that help the user notice gaps, contradictions,
or unrealistic expectations in their career plans.

User data:
- Full name: {full_name}
- Strengths: {strengths}
- Struggles with: {struggles}
- Preferred role: {preferred_role}
- Risk-taking: {risk_taking}
- Field of study: {field_of_study}
- Location: {location}
- Willing to relocate: {mobility}
- Financial capacity: {financial_status}
- Leadership role: {leadership}

Guidelines:
- Merge 1-2 fields into practical, scenario-based questions.
- Gently surface contradictions (skills vs interests, risk appetite vs
  stability preference, financial limits vs expensive paths).
- Include at least one question about location, relocation, or finances.
- Use the user's name naturally in 1-2 questions; keep an empathetic tone
  in 1-2 questions, not all.

Respond ONLY with a JSON array of plain question strings.";

pub const CROSS_EXAM_ANALYSIS_TEMPLATE: &str = "\
You are a career counselor. Analyze the user's answers critically.

User profile:
- Full name: {full_name}
- Strengths: {strengths}
- Struggles with: {struggles}
- Preferred role: {preferred_role}
- Risk-taking: {risk_taking}
- Leadership role: {leadership}

Questions asked: {questions}
User's answers: {answers}

Return a JSON object with exactly these keys:
- strengths (updated, list of strings)
- weaknesses (updated, list of strings)
- skill_gaps (list of strings)
- suggestions (list of strings)
- next_steps (list of strings)
- friendly_summary (short, clear string for the user)";

pub const CROSS_EXAM_FOLLOWUPS_TEMPLATE: &str = "\
You are a friendly career counselor. Based on the user's profile and the
answers below, identify areas that need clarification, examples, or
expansion, and generate 2-3 follow-up questions.

User profile:
- Full name: {full_name}
- Preferred role: {preferred_role}
- Risk-taking: {risk_taking}

Questions asked: {questions}
User's answers: {answers}

Respond ONLY with a JSON array where each entry is an object with:
- question (string)
- type (one of: verification, expansion, clarification)
- confidence (number between 0 and 1)";

pub const GAP_ANALYSIS_TEMPLATE: &str = "\
You are a senior human career counselor.
Your task is NOT to be generic: differentiate this user from others with
similar skills. First, internally identify conflicting signals across the
data, overused strengths, and hidden risks. Then produce a JSON career
guidance report.

REQUIRED OUTPUT KEYS:
1. friendly_summary: 5-6 lines; gently mention ONE uncomfortable truth, ONE
   hidden advantage, and ONE practical limitation.
2. top_careers: EXACTLY 3 entries, each with name, category (one of SAFE,
   NON_OBVIOUS, HIGH_RISK), merits, demerits, trends. Only one career may be
   a safe/common choice; at least one must be non-obvious; at least one must
   be high-risk/high-effort.
3. strengths: only strengths actually proven by the data.
4. weaknesses: include at least one internal weakness.
5. skill_gaps: gaps that BLOCK progress, not generic learning suggestions.
6. suggestions: actions that reduce risk or confirm fit.
7. next_steps: concrete 30-60-90 day actions.
8. key_conflicts: 2-3 bullets describing contradictions in the profile.

USER DATA:
personal_info={personal_info}
optional_fields={optional_fields}
socio_summary={socio_summary}
resume_summary={resume_summary}
learning_summary={learning_summary}
aptitude_summary={aptitude_summary}
cross_summary={cross_summary}
constraints={constraints}

STRICT RULES:
- Do NOT repeat standard career lists blindly, and do NOT recommend all
  tech roles.
- At least ONE career demerit must relate directly to a key conflict.
- Every section must feel specific to THIS person.
- Market trends must be relevant to this user's background and constraints.";

pub const RECOMMENDATION_TEMPLATE: &str = "\
Using this student analysis: {analysis}

Suggest the top 3 most suitable career pathways with reasoning, and provide
a short roadmap for each.

Return a JSON object with exactly these keys:
- pathways (list of 3 strings, each naming a pathway with its reasoning)
- roadmaps (list of 3 strings, one short roadmap per pathway, same order)";

pub const FINAL_REPORT_TEMPLATE: &str = "\
You are an expert career counselor consolidating a final report.
Merge the structured gap report and the pathway recommendations below into
one user-facing career guidance report. Keep the tone motivating and
supportive; do not drop any career option.

Gap report: {gap_report}
Pathway recommendations: {recommendations}

Return a JSON object with exactly these keys: friendly_summary, top_careers
(EXACTLY 3 entries with name, category, merits, demerits, trends),
strengths, weaknesses, skill_gaps, suggestions, next_steps.";

/// Template lookup by stage. Cross-exam owns two templates; this returns
/// the question-generation one (`cross_exam` picks explicitly).
pub fn template_for(stage: Stage) -> &'static str {
    match stage {
        Stage::SocioEconomic => SOCIO_ECONOMIC_TEMPLATE,
        Stage::LearningRoadmap => LEARNING_ROADMAP_TEMPLATE,
        Stage::ResumeAnalysis => RESUME_ANALYSIS_TEMPLATE,
        Stage::AptitudeInterest => APTITUDE_INTEREST_TEMPLATE,
        Stage::CrossExam => CROSS_EXAM_QUESTIONS_TEMPLATE,
        Stage::GapAnalysis => GAP_ANALYSIS_TEMPLATE,
        Stage::Recommendation => RECOMMENDATION_TEMPLATE,
        Stage::FinalReport => FINAL_REPORT_TEMPLATE,
    }
}

/// Fills `{key}` slots in a template. A slot whose value is `None` removes
/// the entire line it sits on, so absent profile fields are omitted from the
/// prompt rather than interpolated as empty placeholders.
///
/// The JSON-only instruction block is appended to every rendered prompt.
pub fn render(template: &str, slots: &[(&str, Option<String>)]) -> String {
    let mut lines: Vec<String> = Vec::new();

    'line: for line in template.lines() {
        let mut rendered = line.to_string();
        for (key, value) in slots {
            let slot = format!("{{{key}}}");
            if rendered.contains(&slot) {
                match value {
                    Some(v) => rendered = rendered.replace(&slot, v),
                    None => continue 'line,
                }
            }
        }
        lines.push(rendered);
    }

    let mut prompt = lines.join("\n");
    prompt.push_str("\n\n");
    prompt.push_str(JSON_ONLY_INSTRUCTION);
    prompt
}
