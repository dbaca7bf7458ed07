/// Fixed parsing instruction. The chunk text is the only variable content
/// in any request, which keeps requests deterministic and cacheable by
/// chunk fingerprint.
pub const SYSTEM_PROMPT: &str = r#"You are a chat log parser. Convert raw conversation text into a JSON array of messages.
Do not add commentary. Output only JSON that starts with '[' and ends with ']'.

Each object MUST include exactly these keys, in this order:
"time", "speaker", "role", "message".

Use "role": "Agent" for internal/agent/rep participants and "User" for external/customer/guest participants.
If a timestamp is missing, use null for time. If a speaker is missing, use "Unknown" for speaker and "Unknown" for role.

Very important: sometimes multiple people talk in one text line.
If a line looks like:
  "ok. since when? neha- today only"
then that is actually two messages:
  - Agent Ravi: "ok. since when?"
  - User Neha: "today only"
Split such lines into one record per speaker turn when punctuation, dashes, or names indicate a reply.

Preserve exact punctuation and emojis. Do not summarize or merge messages."#;

/// GBNF grammar constraining llama.cpp server output to a JSON array of
/// objects with exactly the four recognized keys
pub const RECORDS_GRAMMAR: &str = r#"root            ::= ws array ws
array           ::= "[" ws (object (ws "," ws object)*)? ws "]"
object          ::= "{" ws time-kv ws "," ws speaker-kv ws "," ws role-kv ws "," ws message-kv ws "}"
time-kv         ::= "\"time\"" ws ":" ws (string | "null")
speaker-kv      ::= "\"speaker\"" ws ":" ws string
role-kv         ::= "\"role\"" ws ":" ws ("\"Agent\"" | "\"User\"" | "\"Unknown\"")
message-kv      ::= "\"message\"" ws ":" ws string
string          ::= "\"" chars "\""
chars           ::= char*
char            ::= [^"\\] | escape
escape          ::= "\\" (["\\/bfnrt] | "u" hex hex hex hex)
hex             ::= [0-9a-fA-F]
ws              ::= [ \t\n\r]*"#;

/// JSON schema equivalent of the grammar, for backends that take a schema
/// constraint directly
pub fn records_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "time": {"type": ["string", "null"]},
                "speaker": {"type": "string"},
                "role": {"type": "string", "enum": ["Agent", "User", "Unknown"]},
                "message": {"type": "string"}
            },
            "required": ["time", "speaker", "role", "message"]
        }
    })
}

/// Build the user prompt for one chunk
pub fn build_parse_prompt(chunk_text: &str) -> String {
    format!(
        "Raw conversation:\n{chunk_text}\n\n\
         Produce the JSON array now. No markdown, no explanations.\n\
         Follow the exact key order in every object:\n\
         \"time\", \"speaker\", \"role\", \"message\""
    )
}

/// Correction prompt used after the backend emitted unusable JSON
pub fn build_correction_prompt(chunk_text: &str) -> String {
    format!(
        "{}\n\nYour previous output was invalid JSON. \
         Re-emit only a valid JSON array of message objects, nothing else.",
        build_parse_prompt(chunk_text)
    )
}
