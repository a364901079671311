mod cars;
mod employee_detail;
mod employees;
mod post_detail;
mod posts;
mod uploads;
mod user_detail;
mod users;

pub use cars::CarsView;
pub use employee_detail::EmployeeDetailView;
pub use employees::EmployeesView;
pub use post_detail::PostDetailView;
pub use posts::PostsView;
pub use uploads::UploadsView;
pub use user_detail::UserDetailView;
pub use users::UsersView;

use querydeck::config::StartView;

use crate::ui::view::{View, ViewContext};

/// Root view for a top-level screen.
pub fn open(view: StartView, ctx: ViewContext) -> Box<dyn View> {
  match view {
    StartView::Cars => Box::new(CarsView::new(ctx)),
    StartView::Employees => Box::new(EmployeesView::new(ctx)),
    StartView::Users => Box::new(UsersView::new(ctx)),
    StartView::Posts => Box::new(PostsView::new(ctx)),
    StartView::Uploads => Box::new(UploadsView::new(ctx)),
  }
}
