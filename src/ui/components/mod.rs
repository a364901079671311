mod command_input;
mod confirm;
mod form;
mod input;
mod key_result;
mod picker;
mod search_input;

pub use command_input::{CommandEvent, CommandInput};
pub use confirm::Confirm;
pub use form::{
  car_form, car_values, employee_form, employee_values, user_form, user_values, Form, FormEvent,
};
pub use input::{InputResult, TextInput};
pub use key_result::KeyResult;
pub use picker::{Picker, PickerEvent};
pub use search_input::{SearchEvent, SearchInput};
