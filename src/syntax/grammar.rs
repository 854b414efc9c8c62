use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "syntax/sdoc.pest"]
pub(super) struct SdocParser;
