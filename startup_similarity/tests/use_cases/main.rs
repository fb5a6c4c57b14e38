mod analyze_idea;
mod search_similar;
