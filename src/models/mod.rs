mod article;
mod email_log;
mod feed;
mod summary;

pub use article::{Article, ArticleQuery, InsertedArticle, NewArticle};
pub use email_log::{EmailKind, EmailLog, EmailStatus, NewEmailLog};
pub use feed::{Feed, NewFeed};
pub use summary::{OchiaiSections, Summary};
