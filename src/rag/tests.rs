use super::*;
use crate::index::{CodeFragment, SharedIndex, VectorIndex};
use crate::providers::Embedder;
use crate::providers::mock::{KeywordEmbedder, RecordingGenerator, UnreachableEmbedder};
use std::sync::atomic::Ordering;

const VOCABULARY: &[&str] = &["add", "sub", "def", "return"];

fn arithmetic_retriever() -> Retriever {
    let embedder = KeywordEmbedder::new(VOCABULARY);
    let mut index = VectorIndex::new(embedder.space());
    for (path, content) in [
        ("a.py", "def add(x, y): return x + y"),
        ("b.py", "def sub(x, y): return x - y"),
    ] {
        let vector = embedder.embed(content).expect("embed should succeed");
        index
            .insert(vector, CodeFragment::whole_file(path, content))
            .expect("insert should succeed");
    }
    Retriever::new(Arc::new(embedder), Arc::new(SharedIndex::new(index)))
}

fn hit(path: &str, content: &str) -> SearchHit {
    SearchHit {
        id: 0,
        fragment: CodeFragment::whole_file(path, content),
        score: 1.0,
    }
}

#[test]
fn context_blocks_are_separated_by_blank_line() {
    let context = prompts::format_context(&[hit("a.py", "x = 1"), hit("b.py", "y = 2")]);
    assert_eq!(context, "File: a.py\nx = 1\n\nFile: b.py\ny = 2");
}

#[test]
fn user_prompt_contains_query_and_context() {
    let prompt = prompts::build_user_prompt("what is x?", "File: a.py\nx = 1");
    assert!(prompt.contains("User Query: what is x?"));
    assert!(prompt.contains("Retrieved Code Context:\nFile: a.py\nx = 1"));
    assert!(prompt.ends_with("Your response:"));
}

#[test]
fn placeholders_inside_the_query_are_kept() {
    let prompt = prompts::build_user_prompt("explain {code_context}", "CTX");
    assert!(prompt.contains("User Query: explain {code_context}"));
    assert_eq!(prompt.matches("CTX").count(), 1);
}

#[test]
fn empty_retrieval_skips_generation() {
    let embedder = KeywordEmbedder::new(VOCABULARY);
    let index = Arc::new(SharedIndex::empty(embedder.space()));
    let retriever = Retriever::new(Arc::new(embedder), index);
    let generator = RecordingGenerator::replying("unused");
    let calls = Arc::clone(&generator.calls);

    let rag = RagOrchestrator::new(retriever, Arc::new(generator));
    assert_eq!(rag.answer("how do I add numbers?"), NO_CONTEXT_MESSAGE);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn answer_uses_retrieved_context_and_default_sampling() {
    let generator = RecordingGenerator::replying("Use add(x, y).");
    let prompts_log = Arc::clone(&generator.prompts);
    let rag = RagOrchestrator::new(arithmetic_retriever(), Arc::new(generator));

    let answer = rag
        .try_answer("function that adds two numbers")
        .expect("answer should succeed");
    assert_eq!(answer.text, "Use add(x, y).");
    assert_eq!(answer.sources[0].fragment.path, "a.py");

    let recorded = prompts_log.lock().expect("prompt log lock poisoned");
    assert_eq!(recorded.len(), 1);
    let prompt = &recorded[0];
    assert_eq!(prompt.system_prompt, SYSTEM_PROMPT);
    assert!(prompt.user_prompt.contains("User Query: function that adds two numbers"));
    assert!(prompt.user_prompt.contains("File: a.py\ndef add(x, y): return x + y\n\nFile: b.py"));
    assert!((prompt.options.temperature - 0.3).abs() < f32::EPSILON);
    assert_eq!(prompt.options.max_tokens, 4000);
}

#[test]
fn policy_limits_context_and_sets_sampling() {
    let generator = RecordingGenerator::replying("ok");
    let prompts_log = Arc::clone(&generator.prompts);
    let rag = RagOrchestrator::new(arithmetic_retriever(), Arc::new(generator)).with_policy(
        GenerationPolicy {
            top_k: 1,
            temperature: 0.7,
            max_tokens: 256,
        },
    );

    rag.answer("subtract");
    let recorded = prompts_log.lock().expect("prompt log lock poisoned");
    assert!(recorded[0].user_prompt.contains("File: b.py"));
    assert!(!recorded[0].user_prompt.contains("File: a.py"));
    assert_eq!(recorded[0].options.max_tokens, 256);
}

#[test]
fn generation_failure_becomes_error_text() {
    let rag = RagOrchestrator::new(arithmetic_retriever(), Arc::new(RecordingGenerator::failing()));

    let text = rag.answer("add");
    assert!(text.starts_with("Error: "), "{text}");
    assert!(text.contains("HTTP 500"), "{text}");

    let error = rag.try_answer("add").expect_err("generation should fail");
    assert!(matches!(error, CodeRagError::GenerationFailure(_)));
}

#[test]
fn retrieval_failure_is_not_wrapped() {
    let mut index = VectorIndex::new(UnreachableEmbedder.space());
    index
        .insert(vec![1.0, 0.0], CodeFragment::whole_file("a.py", "x"))
        .expect("insert should succeed");
    let retriever = Retriever::new(
        Arc::new(UnreachableEmbedder),
        Arc::new(SharedIndex::new(index)),
    );
    let generator = RecordingGenerator::replying("unused");
    let calls = Arc::clone(&generator.calls);
    let rag = RagOrchestrator::new(retriever, Arc::new(generator));

    let error = rag.try_answer("add").expect_err("retrieval should fail");
    assert!(matches!(error, CodeRagError::ProviderUnavailable { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let text = rag.answer("add");
    assert!(text.starts_with("Error: "));
    assert!(text.contains("Hint: "));
}

#[test]
fn dimension_mismatch_text_suggests_rebuild() {
    let error = CodeRagError::DimensionMismatch {
        expected: 768,
        actual: 1536,
    };
    let text = render_error(&error);
    assert!(text.starts_with("Error: "));
    assert!(text.contains("768"));
    assert!(text.contains("coderag index"));
}

#[test]
fn policy_from_config() {
    let mut config = Config::default();
    config.retrieval.top_k = 5;
    config.generation.temperature = 0.1;
    config.generation.max_tokens = 1000;

    let policy = GenerationPolicy::from_config(&config);
    assert_eq!(policy.top_k, 5);
    assert_eq!(policy.max_tokens, 1000);
    assert_eq!(GenerationPolicy::from_config(&Config::default()), GenerationPolicy::default());
}
