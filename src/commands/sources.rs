//! Knowledge source listing and display

use crate::meta::KnowledgeSource;
use clap_complete::Shell;

pub fn print_source(source: &KnowledgeSource) {
    println!("• {} [{}]", source.name, source.status);
    println!("  ID: {}", source.id);
    println!("  Agent: {}", source.agent_id);
    println!("  URL: {}", source.url);
    println!("  Created: {}", source.created_at);
    println!("  Updated: {}", source.updated_at);
}

pub fn print_sources(sources: &[KnowledgeSource]) {
    println!("\n📚 Knowledge Sources\n");

    if sources.is_empty() {
        println!("No knowledge sources. Use 'knowledge-crawler add' to register a website.");
        return;
    }

    for source in sources {
        print_source(source);
        println!();
    }
}

/// Print source IDs with descriptions for shell completions
pub fn print_source_completions(sources: &[KnowledgeSource], shell: Shell) {
    for source in sources {
        let description = format!("{} ({}), {}", source.name, source.url, source.status)
            .replace('\n', " ");

        match shell {
            Shell::Zsh => println!("{}:{}", source.id, description.replace(':', "\\:")),
            Shell::Fish => println!("{}\t{}", source.id, description),
            _ => println!("{}", source.id),
        }
    }
}
