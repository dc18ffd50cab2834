mod community;
mod peer;
mod route;

pub use community::{Community, CommunityList, ExtCommunity, LargeCommunity};
pub use peer::Relationship;
pub use route::Origin;
