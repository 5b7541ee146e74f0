// Entity Models
//
// Each record is independently addressable by a generated UUID:
// - Product / CounterpartyProductMapping (catalog)
// - IncomingOrder (with embedded duplicate + mismatch detail)
// - UnresolvedCodeEntry (review queue)

pub mod order;
pub mod product;
pub mod review;

pub use order::{
    Confidence, DocumentKind, DuplicateMatchResult, IncomingOrder, LineItem, LineResolution,
    MatchType, MismatchReason, OrderIntake, OrderStatus, PriceMismatchLine, ResolutionMethod,
    SourceMetadata,
};
pub use product::{CounterpartyProductMapping, NewProduct, Product};
pub use review::{CounterpartyType, ReviewStatus, UnresolvedCodeEntry, UnresolvedFilter};
