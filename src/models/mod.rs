pub mod claude;
pub mod openai;
