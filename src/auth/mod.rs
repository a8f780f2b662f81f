//! Delegated authorization: token cache, interactive consent, landing routes.

pub mod callback;
pub mod consent;
pub mod signal;
pub mod surface;
pub mod token;

pub use callback::callback_routes;
pub use consent::{AttemptState, ConsentCoordinator, ConsentFlow};
pub use signal::{ConsentChannel, ConsentSignal};
pub use surface::{BrowserSurface, ConsentSurface, SurfaceError, SurfaceHandle};
pub use token::{AccessToken, TokenStore};
